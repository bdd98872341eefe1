//! Blob service data plane: SharedKey request signing and XML listings.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use url::Url;

use crate::error::{Error, Result};
use crate::models::{Container, PublicAccess};
use crate::pager::Page;

/// REST version sent with every data plane request.
pub const STORAGE_VERSION: &str = "2021-08-06";

const PUBLIC_BLOB_SUFFIX: &str = "blob.core.windows.net";

type HmacSha256 = Hmac<Sha256>;

/// Where an account's blob service lives.
#[derive(Debug, Clone)]
pub enum BlobEndpoint {
    /// `https://{account}.{suffix}/`
    Subdomain { suffix: String },
    /// `{base}/{account}/`, used by emulators and local test servers.
    PathStyle(Url),
}

impl Default for BlobEndpoint {
    fn default() -> Self {
        BlobEndpoint::Subdomain {
            suffix: PUBLIC_BLOB_SUFFIX.to_string(),
        }
    }
}

impl BlobEndpoint {
    /// Root URL of the account's blob service, always ending in `/`.
    pub fn account_url(&self, account: &str) -> Result<Url> {
        let raw = match self {
            BlobEndpoint::Subdomain { suffix } => format!("https://{}.{}/", account, suffix),
            BlobEndpoint::PathStyle(base) => {
                format!("{}/{}/", base.as_str().trim_end_matches('/'), account)
            }
        };
        Url::parse(&raw).map_err(|e| Error::decode(account, e))
    }

    pub fn list_containers_url(&self, account: &str, marker: Option<&str>) -> Result<Url> {
        let mut url = self.account_url(account)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("comp", "list");
            if let Some(marker) = marker {
                query.append_pair("marker", marker);
            }
        }
        Ok(url)
    }

    pub fn list_blobs_url(
        &self,
        account: &str,
        container: &str,
        marker: Option<&str>,
    ) -> Result<Url> {
        let mut url = self
            .account_url(account)?
            .join(container)
            .map_err(|e| Error::decode(container, e))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("restype", "container");
            query.append_pair("comp", "list");
            if let Some(marker) = marker {
                query.append_pair("marker", marker);
            }
        }
        Ok(url)
    }
}

/// `/{account}{path}` followed by the sorted, decoded query parameters.
pub fn canonicalized_resource(account: &str, url: &Url) -> String {
    let mut resource = format!("/{}{}", account, url.path());

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_lowercase(), v.into_owned()))
        .collect();
    params.sort();

    for (name, value) in params {
        resource.push('\n');
        resource.push_str(&name);
        resource.push(':');
        resource.push_str(&value);
    }
    resource
}

/// String-to-sign of a body-less GET carrying only `x-ms-date` and `x-ms-version`.
pub fn string_to_sign(date: &str, canonical_resource: &str) -> String {
    // VERB, then eleven empty standard headers from Content-Encoding to Range.
    format!(
        "GET\n{}x-ms-date:{}\nx-ms-version:{}\n{}",
        "\n".repeat(11),
        date,
        STORAGE_VERSION,
        canonical_resource
    )
}

/// Base64 HMAC-SHA256 of `payload` keyed with the decoded account key.
pub fn sign(key: &SecretString, payload: &str) -> Result<String> {
    let key_bytes = STANDARD
        .decode(key.expose_secret())
        .map_err(|e| Error::Authentication(format!("account key is not valid base64: {}", e)))?;
    let mut mac = HmacSha256::new_from_slice(&key_bytes)
        .map_err(|e| Error::Authentication(format!("unusable account key: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

pub fn rfc1123(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Headers authorizing a GET on `url` with the account's shared key.
pub fn signed_headers(
    account: &str,
    key: &SecretString,
    url: &Url,
    now: DateTime<Utc>,
) -> Result<HeaderMap> {
    let date = rfc1123(now);
    let signature = sign(key, &string_to_sign(&date, &canonicalized_resource(account, url)))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        "x-ms-date",
        HeaderValue::from_str(&date).map_err(|e| Error::decode(account, e))?,
    );
    headers.insert("x-ms-version", HeaderValue::from_static(STORAGE_VERSION));
    headers.insert(
        reqwest::header::AUTHORIZATION,
        HeaderValue::from_str(&format!("SharedKey {}:{}", account, signature))
            .map_err(|e| Error::decode(account, e))?,
    );
    Ok(headers)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerEnumeration {
    #[serde(default)]
    containers: ContainerList,
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ContainerList {
    #[serde(rename = "Container", default)]
    items: Vec<ContainerEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerEntry {
    name: String,
    #[serde(default)]
    properties: ContainerProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerProperties {
    public_access: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlobEnumeration {
    #[serde(default)]
    blobs: BlobList,
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    items: Vec<BlobEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlobEntry {
    name: String,
}

/// The service sends `<NextMarker />` on the last page.
fn marker(raw: Option<String>) -> Option<String> {
    raw.map(|m| m.trim().to_string()).filter(|m| !m.is_empty())
}

pub fn parse_container_page(resource: &str, xml: &str) -> Result<Page<Container>> {
    let parsed: ContainerEnumeration =
        quick_xml::de::from_str(xml).map_err(|e| Error::decode(resource, e))?;

    let items = parsed
        .containers
        .items
        .into_iter()
        .map(|c| Container {
            name: c.name,
            public_access: PublicAccess::parse(c.properties.public_access.as_deref()),
        })
        .collect();

    Ok(Page::new(items, marker(parsed.next_marker)))
}

pub fn parse_blob_page(resource: &str, xml: &str) -> Result<Page<String>> {
    let parsed: BlobEnumeration =
        quick_xml::de::from_str(xml).map_err(|e| Error::decode(resource, e))?;

    let names = parsed.blobs.items.into_iter().map(|b| b.name).collect();
    Ok(Page::new(names, marker(parsed.next_marker)))
}
