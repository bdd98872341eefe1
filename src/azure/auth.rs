//! Access token credentials for Azure Resource Manager.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Scope of Resource Manager tokens.
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

const AUTHORITY: &str = "https://login.microsoftonline.com";

/// Tokens are refreshed this long before they expire.
const REFRESH_SKEW: Duration = Duration::from_secs(300);

/// Used when the issuer does not say how long a token lives.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(30 * 60);

#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn access_token(&self, scope: &str) -> Result<SecretString>;

    fn name(&self) -> &str;
}

struct CachedToken {
    scope: String,
    token: SecretString,
    expires_at: Instant,
}

/// Single-entry token cache shared by both credentials.
#[derive(Default)]
struct TokenCache(Mutex<Option<CachedToken>>);

impl TokenCache {
    async fn get_or_fetch<F, Fut>(&self, scope: &str, fetch: F) -> Result<SecretString>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(SecretString, Duration)>>,
    {
        let mut slot = self.0.lock().await;

        if let Some(cached) = slot.as_ref()
            && cached.scope == scope
            && cached.expires_at > Instant::now() + REFRESH_SKEW
        {
            return Ok(SecretString::from(cached.token.expose_secret().to_string()));
        }

        let (token, lifetime) = fetch().await?;
        let copy = SecretString::from(token.expose_secret().to_string());
        *slot = Some(CachedToken {
            scope: scope.to_string(),
            token,
            expires_at: Instant::now() + lifetime,
        });
        Ok(copy)
    }
}

/// OAuth2 client-credentials flow for a service principal.
pub struct ClientSecretCredential {
    http: reqwest::Client,
    authority: String,
    tenant_id: String,
    client_id: String,
    client_secret: SecretString,
    cache: TokenCache,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct TokenError {
    error: Option<String>,
    error_description: Option<String>,
}

impl ClientSecretCredential {
    pub fn new(
        http: reqwest::Client,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
    ) -> Self {
        Self {
            http,
            authority: AUTHORITY.to_string(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret,
            cache: TokenCache::default(),
        }
    }

    /// Point the token request at another authority host.
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    async fn request_token(&self, scope: &str) -> Result<(SecretString, Duration)> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority.trim_end_matches('/'),
            self.tenant_id
        );
        debug!("Requesting token for client {} from {}", self.client_id, url);

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("scope", scope),
        ];

        let response = self
            .http
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Authentication(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body: TokenError = response.json().await.unwrap_or(TokenError {
                error: None,
                error_description: None,
            });
            let detail = body
                .error_description
                .or(body.error)
                .unwrap_or_else(|| "no details".to_string());
            let detail = detail.lines().next().unwrap_or_default().to_string();
            return Err(Error::Authentication(format!("{} ({})", detail, status)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Authentication(format!("invalid token response: {}", e)))?;

        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LIFETIME);

        Ok((SecretString::from(token.access_token), lifetime))
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn access_token(&self, scope: &str) -> Result<SecretString> {
        self.cache
            .get_or_fetch(scope, || self.request_token(scope))
            .await
    }

    fn name(&self) -> &str {
        "service principal"
    }
}

/// Reuses the session of a logged-in Azure CLI (`az login`).
#[derive(Default)]
pub struct AzureCliCredential {
    tenant_id: Option<String>,
    cache: TokenCache,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    /// Unix timestamp, emitted by az 2.54 and later.
    #[serde(rename = "expires_on")]
    expires_on: Option<i64>,
}

impl AzureCliCredential {
    pub fn new(tenant_id: Option<String>) -> Self {
        Self {
            tenant_id,
            cache: TokenCache::default(),
        }
    }

    async fn request_token(&self, scope: &str) -> Result<(SecretString, Duration)> {
        let resource = scope.trim_end_matches("/.default");
        let mut command = tokio::process::Command::new("az");
        command.args([
            "account",
            "get-access-token",
            "--resource",
            resource,
            "--output",
            "json",
        ]);
        if let Some(tenant) = &self.tenant_id {
            command.args(["--tenant", tenant]);
        }

        debug!("Requesting token from Azure CLI for {}", resource);
        let output = command
            .output()
            .await
            .map_err(|e| Error::Authentication(format!("could not run Azure CLI: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr
                .lines()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("az account get-access-token failed")
                .trim()
                .to_string();
            return Err(Error::Authentication(detail));
        }

        let token: CliToken = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Authentication(format!("unexpected Azure CLI output: {}", e)))?;

        Ok((
            SecretString::from(token.access_token),
            cli_lifetime(token.expires_on, chrono::Utc::now().timestamp()),
        ))
    }
}

fn cli_lifetime(expires_on: Option<i64>, now: i64) -> Duration {
    match expires_on {
        Some(at) if at > now => Duration::from_secs((at - now) as u64),
        Some(_) => Duration::ZERO,
        None => DEFAULT_LIFETIME,
    }
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    async fn access_token(&self, scope: &str) -> Result<SecretString> {
        self.cache
            .get_or_fetch(scope, || self.request_token(scope))
            .await
    }

    fn name(&self) -> &str {
        "Azure CLI"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_cli_lifetime() {
        assert_eq!(cli_lifetime(Some(1_000), 400), Duration::from_secs(600));
        assert_eq!(cli_lifetime(Some(100), 400), Duration::ZERO);
        assert_eq!(cli_lifetime(None, 400), DEFAULT_LIFETIME);
    }

    #[tokio::test]
    async fn test_token_cache_reuses_fresh_token() {
        let cache = TokenCache::default();
        let fetches = AtomicUsize::new(0);

        for _ in 0..3 {
            let token = cache
                .get_or_fetch(MANAGEMENT_SCOPE, || async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok((SecretString::from("tok".to_string()), Duration::from_secs(3600)))
                })
                .await
                .unwrap();
            assert_eq!(token.expose_secret(), "tok");
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_cache_refreshes_near_expiry() {
        let cache = TokenCache::default();
        let fetches = AtomicUsize::new(0);

        for _ in 0..2 {
            cache
                .get_or_fetch(MANAGEMENT_SCOPE, || async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok((SecretString::from("tok".to_string()), Duration::from_secs(60)))
                })
                .await
                .unwrap();
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_secret_credential_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "expires_in": 3599,
                "access_token": "arm-token"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credential = ClientSecretCredential::new(
            reqwest::Client::new(),
            "tenant-1",
            "app-id",
            SecretString::from("secret".to_string()),
        )
        .with_authority(server.uri());

        let first = credential.access_token(MANAGEMENT_SCOPE).await.unwrap();
        let second = credential.access_token(MANAGEMENT_SCOPE).await.unwrap();
        assert_eq!(first.expose_secret(), "arm-token");
        assert_eq!(second.expose_secret(), "arm-token");
    }

    #[tokio::test]
    async fn test_client_secret_credential_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "invalid_client",
                "error_description": "AADSTS7000215: Invalid client secret provided.\r\nTrace ID: x"
            })))
            .mount(&server)
            .await;

        let credential = ClientSecretCredential::new(
            reqwest::Client::new(),
            "tenant-1",
            "app-id",
            SecretString::from("wrong".to_string()),
        )
        .with_authority(server.uri());

        let err = credential.access_token(MANAGEMENT_SCOPE).await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert!(err.to_string().contains("AADSTS7000215"));
    }
}
