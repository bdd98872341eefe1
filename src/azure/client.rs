//! REST client for Azure Resource Manager and the Blob service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::CloudApi;
use super::auth::{MANAGEMENT_SCOPE, TokenCredential};
use super::blob::{self, BlobEndpoint};
use crate::error::{Error, Result};
use crate::models::{
    AccountKey, Container, ResourceGroup, StorageAccount, Subscription, SubscriptionState, Tenant,
};
use crate::pager::Page;

const MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";

const TENANTS_API_VERSION: &str = "2022-12-01";
const SUBSCRIPTIONS_API_VERSION: &str = "2022-12-01";
const RESOURCE_GROUPS_API_VERSION: &str = "2021-04-01";
const STORAGE_API_VERSION: &str = "2023-01-01";

/// Base URLs of the two planes.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub management: String,
    pub blob: BlobEndpoint,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            management: MANAGEMENT_ENDPOINT.to_string(),
            blob: BlobEndpoint::default(),
        }
    }
}

/// Build the shared HTTP client.
pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("bhunt/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))
}

pub struct AzureClient {
    http: Client,
    credential: Arc<dyn TokenCredential>,
    endpoints: Endpoints,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
struct ArmList<T> {
    #[serde(default)]
    value: Vec<T>,
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TenantWire {
    tenant_id: String,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionWire {
    subscription_id: String,
    display_name: Option<String>,
    tenant_id: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedWire {
    name: String,
}

#[derive(Debug, Deserialize)]
struct KeyListWire {
    #[serde(default)]
    keys: Vec<KeyWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyWire {
    key_name: String,
    value: String,
}

/// Seconds from a `Retry-After` header; HTTP-date forms are ignored.
fn retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

impl AzureClient {
    pub fn new(http: Client, credential: Arc<dyn TokenCredential>, endpoints: Endpoints) -> Self {
        Self {
            http,
            credential,
            endpoints,
        }
    }

    /// Fetch a management token once so bad credentials fail before scanning.
    pub async fn verify_credentials(&self) -> Result<()> {
        self.credential.access_token(MANAGEMENT_SCOPE).await?;
        debug!("Authenticated with {}", self.credential.name());
        Ok(())
    }

    fn management_url(&self, path_and_query: &str) -> String {
        format!(
            "{}{}",
            self.endpoints.management.trim_end_matches('/'),
            path_and_query
        )
    }

    async fn send(&self, resource: &str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(resource, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let wait = retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        debug!(resource = resource, status = status.as_u16(), "Request rejected");
        Err(Error::from_status(resource, status.as_u16(), wait, &body))
    }

    async fn arm_request<T: DeserializeOwned>(
        &self,
        resource: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        let token = self.credential.access_token(MANAGEMENT_SCOPE).await?;
        let response = self
            .send(resource, request.bearer_auth(token.expose_secret()))
            .await?;
        response.json::<T>().await.map_err(|e| Error::decode(resource, e))
    }

    /// GET one page of an ARM collection. `cursor` is the previous `nextLink`.
    async fn arm_page<W: DeserializeOwned>(
        &self,
        resource: &str,
        first: &str,
        cursor: Option<String>,
    ) -> Result<(Vec<W>, Option<String>)> {
        let url = match cursor {
            Some(next_link) => next_link,
            None => self.management_url(first),
        };
        debug!("GET {}", url);

        let list: ArmList<W> = self.arm_request(resource, self.http.get(&url)).await?;
        let next = list.next_link.filter(|l| !l.is_empty());
        Ok((list.value, next))
    }

    async fn blob_xml(
        &self,
        resource: &str,
        account: &str,
        key: &SecretString,
        url: Url,
    ) -> Result<String> {
        let headers = blob::signed_headers(account, key, &url, chrono::Utc::now())?;
        debug!("GET {}", url);
        let response = self
            .send(resource, self.http.get(url).headers(headers))
            .await?;
        response.text().await.map_err(|e| Error::transport(resource, e))
    }
}

#[async_trait]
impl CloudApi for AzureClient {
    async fn list_tenants(&self, cursor: Option<String>) -> Result<Page<Tenant>> {
        let path = format!("/tenants?api-version={}", TENANTS_API_VERSION);
        let (items, next) = self.arm_page::<TenantWire>("tenants", &path, cursor).await?;

        let tenants = items
            .into_iter()
            .map(|t| Tenant {
                name: t.display_name.unwrap_or_else(|| t.tenant_id.clone()),
                id: t.tenant_id,
            })
            .collect();
        Ok(Page::new(tenants, next))
    }

    async fn list_subscriptions(&self, cursor: Option<String>) -> Result<Page<Subscription>> {
        let path = format!("/subscriptions?api-version={}", SUBSCRIPTIONS_API_VERSION);
        let (items, next) = self
            .arm_page::<SubscriptionWire>("subscriptions", &path, cursor)
            .await?;

        let subscriptions = items
            .into_iter()
            .map(|s| Subscription {
                name: s.display_name.unwrap_or_else(|| s.subscription_id.clone()),
                id: s.subscription_id,
                tenant_id: s.tenant_id.unwrap_or_default(),
                state: SubscriptionState::parse(s.state.as_deref().unwrap_or_default()),
            })
            .collect();
        Ok(Page::new(subscriptions, next))
    }

    async fn list_resource_groups(
        &self,
        subscription_id: &str,
        cursor: Option<String>,
    ) -> Result<Page<ResourceGroup>> {
        let path = format!(
            "/subscriptions/{}/resourcegroups?api-version={}",
            subscription_id, RESOURCE_GROUPS_API_VERSION
        );
        let resource = format!("{} resource groups", subscription_id);
        let (items, next) = self.arm_page::<NamedWire>(&resource, &path, cursor).await?;

        let groups = items
            .into_iter()
            .map(|g| ResourceGroup { name: g.name })
            .collect();
        Ok(Page::new(groups, next))
    }

    async fn list_storage_accounts(
        &self,
        subscription_id: &str,
        resource_group: &str,
        cursor: Option<String>,
    ) -> Result<Page<StorageAccount>> {
        let path = format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Storage/storageAccounts?api-version={}",
            subscription_id, resource_group, STORAGE_API_VERSION
        );
        let resource = format!("{} storage accounts", resource_group);
        let (items, next) = self.arm_page::<NamedWire>(&resource, &path, cursor).await?;

        let accounts = items
            .into_iter()
            .map(|a| StorageAccount {
                name: a.name,
                resource_group: resource_group.to_string(),
            })
            .collect();
        Ok(Page::new(accounts, next))
    }

    async fn list_account_keys(
        &self,
        subscription_id: &str,
        resource_group: &str,
        account: &str,
    ) -> Result<Vec<AccountKey>> {
        let url = self.management_url(&format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Storage/storageAccounts/{}/listKeys?api-version={}",
            subscription_id, resource_group, account, STORAGE_API_VERSION
        ));
        let resource = format!("{} keys", account);
        debug!("POST {}", url);

        // ARM rejects a POST without Content-Length.
        let list: KeyListWire = self
            .arm_request(&resource, self.http.post(&url).body(""))
            .await?;

        Ok(list
            .keys
            .into_iter()
            .map(|k| AccountKey {
                name: k.key_name,
                value: SecretString::from(k.value),
            })
            .collect())
    }

    async fn list_containers(
        &self,
        account: &str,
        key: &SecretString,
        cursor: Option<String>,
    ) -> Result<Page<Container>> {
        let url = self
            .endpoints
            .blob
            .list_containers_url(account, cursor.as_deref())?;
        let resource = format!("{} containers", account);
        let xml = self.blob_xml(&resource, account, key, url).await?;
        blob::parse_container_page(&resource, &xml)
    }

    async fn list_blobs(
        &self,
        account: &str,
        container: &str,
        key: &SecretString,
        cursor: Option<String>,
    ) -> Result<Page<String>> {
        let url = self
            .endpoints
            .blob
            .list_blobs_url(account, container, cursor.as_deref())?;
        let resource = format!("{}/{}", account, container);
        let xml = self.blob_xml(&resource, account, key, url).await?;
        blob::parse_blob_page(&resource, &xml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticToken;

    #[async_trait]
    impl TokenCredential for StaticToken {
        async fn access_token(&self, _scope: &str) -> Result<SecretString> {
            Ok(SecretString::from("test-token".to_string()))
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    fn client(server: &MockServer) -> AzureClient {
        AzureClient::new(
            Client::new(),
            Arc::new(StaticToken),
            Endpoints {
                management: server.uri(),
                blob: BlobEndpoint::PathStyle(Url::parse(&server.uri()).unwrap()),
            },
        )
    }

    fn key() -> SecretString {
        SecretString::from("c2VjcmV0LWFjY291bnQta2V5".to_string())
    }

    #[tokio::test]
    async fn test_list_subscriptions_follows_next_link() {
        let server = MockServer::start().await;
        let next_link = format!(
            "{}/subscriptions?api-version=2022-12-01&$skiptoken=abc",
            server.uri()
        );

        Mock::given(method("GET"))
            .and(path("/subscriptions"))
            .and(query_param("$skiptoken", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [{
                    "subscriptionId": "sub-2",
                    "tenantId": "t-1",
                    "displayName": "Legacy",
                    "state": "Disabled"
                }]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/subscriptions"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [{
                    "subscriptionId": "sub-1",
                    "tenantId": "t-1",
                    "displayName": "Production",
                    "state": "Enabled"
                }],
                "nextLink": next_link
            })))
            .mount(&server)
            .await;

        let api = client(&server);
        let first = api.list_subscriptions(None).await.unwrap();
        assert_eq!(first.items[0].id, "sub-1");
        assert!(first.items[0].is_enabled());
        assert_eq!(first.next.as_deref(), Some(next_link.as_str()));

        let second = api.list_subscriptions(first.next).await.unwrap();
        assert_eq!(second.items[0].name, "Legacy");
        assert!(!second.items[0].is_enabled());
        assert!(second.next.is_none());
    }

    #[tokio::test]
    async fn test_tenant_list_without_value_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tenants"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let page = client(&server).list_tenants(None).await.unwrap();
        assert!(page.items.is_empty());
        assert!(page.next.is_none());
    }

    #[tokio::test]
    async fn test_throttled_response_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/resourcegroups"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let err = client(&server)
            .list_resource_groups("sub-1", None)
            .await
            .unwrap_err();
        match err {
            Error::Throttled { retry_after, .. } => assert_eq!(retry_after.as_secs(), 7),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_keys_forbidden_is_permission_denied() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(
                "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/acct/listKeys",
            ))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": {"code": "AuthorizationFailed", "message": "no listKeys action"}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .list_account_keys("sub-1", "rg", "acct")
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn test_list_keys() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(
                "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/acct/listKeys",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "keys": [
                    {"keyName": "key1", "value": "AAAA", "permissions": "FULL"},
                    {"keyName": "key2", "value": "BBBB", "permissions": "FULL"}
                ]
            })))
            .mount(&server)
            .await;

        let keys = client(&server)
            .list_account_keys("sub-1", "rg", "acct")
            .await
            .unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].name, "key1");
        assert_eq!(keys[0].value.expose_secret(), "AAAA");
    }

    #[tokio::test]
    async fn test_list_containers_signed_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acct/"))
            .and(query_param("comp", "list"))
            .and(header("x-ms-version", blob::STORAGE_VERSION))
            .and(header_exists("x-ms-date"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults><Containers><Container><Name>public</Name><Properties><PublicAccess>container</PublicAccess></Properties></Container></Containers><NextMarker /></EnumerationResults>"#,
            ))
            .mount(&server)
            .await;

        let page = client(&server)
            .list_containers("acct", &key(), None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.items[0].public_access.is_public());
        assert!(page.next.is_none());
    }

    #[tokio::test]
    async fn test_list_blobs_rejected_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acct/public"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                "<Error><Code>AuthenticationFailed</Code><Message>Signature mismatch</Message></Error>",
            ))
            .mount(&server)
            .await;

        let err = client(&server)
            .list_blobs("acct", "public", &key(), None)
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
        assert!(err.to_string().contains("Signature mismatch"));
    }
}
