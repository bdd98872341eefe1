//! Azure listing APIs.
//!
//! The scanner only sees [`CloudApi`]; [`client::AzureClient`] implements it
//! over the Resource Manager and Blob service REST APIs.

pub mod auth;
pub mod blob;
pub mod client;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::Result;
use crate::models::{AccountKey, Container, ResourceGroup, StorageAccount, Subscription, Tenant};
use crate::pager::Page;

pub use client::{AzureClient, Endpoints};

/// Paginated, read-only view of the tenant → blob hierarchy.
///
/// Listing calls take the continuation cursor returned by the previous page
/// (`None` for the first page). Any call may fail with `Error::Throttled`
/// or `Error::PermissionDenied`.
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn list_tenants(&self, cursor: Option<String>) -> Result<Page<Tenant>>;

    async fn list_subscriptions(&self, cursor: Option<String>) -> Result<Page<Subscription>>;

    async fn list_resource_groups(
        &self,
        subscription_id: &str,
        cursor: Option<String>,
    ) -> Result<Page<ResourceGroup>>;

    async fn list_storage_accounts(
        &self,
        subscription_id: &str,
        resource_group: &str,
        cursor: Option<String>,
    ) -> Result<Page<StorageAccount>>;

    async fn list_account_keys(
        &self,
        subscription_id: &str,
        resource_group: &str,
        account: &str,
    ) -> Result<Vec<AccountKey>>;

    async fn list_containers(
        &self,
        account: &str,
        key: &SecretString,
        cursor: Option<String>,
    ) -> Result<Page<Container>>;

    /// Blob names only; contents are never read.
    async fn list_blobs(
        &self,
        account: &str,
        container: &str,
        key: &SecretString,
        cursor: Option<String>,
    ) -> Result<Page<String>>;
}
