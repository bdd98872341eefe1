//! Resource hierarchy and finding types.

use std::fmt;

use secrecy::SecretString;

use crate::classifier::ExtensionHistogram;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    pub id: String,
    pub name: String,
}

/// Subscription lifecycle state as reported by ARM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    Enabled,
    Disabled,
    Warned,
    PastDue,
    Deleted,
    Other(String),
}

impl SubscriptionState {
    pub fn parse(state: &str) -> Self {
        match state {
            "Enabled" => Self::Enabled,
            "Disabled" => Self::Disabled,
            "Warned" => Self::Warned,
            "PastDue" => Self::PastDue,
            "Deleted" => Self::Deleted,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled => write!(f, "Enabled"),
            Self::Disabled => write!(f, "Disabled"),
            Self::Warned => write!(f, "Warned"),
            Self::PastDue => write!(f, "PastDue"),
            Self::Deleted => write!(f, "Deleted"),
            Self::Other(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
    pub state: SubscriptionState,
}

impl Subscription {
    pub fn is_enabled(&self) -> bool {
        self.state == SubscriptionState::Enabled
    }
}

/// A subscription paired with its owning tenant; the unit of scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    pub tenant: Tenant,
    pub subscription: Subscription,
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.subscription.name, self.subscription.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroup {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageAccount {
    pub name: String,
    pub resource_group: String,
}

/// One access key of a storage account. The value never leaves memory.
#[derive(Debug)]
pub struct AccountKey {
    pub name: String,
    pub value: SecretString,
}

/// Pick the primary key: `key1` when present, otherwise the first one listed.
pub fn primary_key(keys: Vec<AccountKey>) -> Option<AccountKey> {
    let idx = keys.iter().position(|k| k.name == "key1").unwrap_or(0);
    keys.into_iter().nth(idx)
}

/// Anonymous access level of a blob container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicAccess {
    None,
    Blob,
    Container,
}

impl PublicAccess {
    /// Parse the service value; a missing or unknown value means private.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("blob") => Self::Blob,
            Some("container") => Self::Container,
            _ => Self::None,
        }
    }

    pub fn is_public(&self) -> bool {
        *self != Self::None
    }
}

impl fmt::Display for PublicAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Blob => write!(f, "blob"),
            Self::Container => write!(f, "container"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    pub public_access: PublicAccess,
}

/// One exposed container. Built once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub tenant_id: String,
    pub tenant_name: String,
    pub subscription_id: String,
    pub subscription_name: String,
    pub resource_group: String,
    pub storage_account: String,
    pub container: String,
    pub access: PublicAccess,
    pub url: String,
    pub histogram: ExtensionHistogram,
}

impl Finding {
    pub fn new(
        target: &ScanTarget,
        account: &StorageAccount,
        container: &Container,
        histogram: ExtensionHistogram,
    ) -> Self {
        Self {
            tenant_id: target.tenant.id.clone(),
            tenant_name: target.tenant.name.clone(),
            subscription_id: target.subscription.id.clone(),
            subscription_name: target.subscription.name.clone(),
            resource_group: account.resource_group.clone(),
            storage_account: account.name.clone(),
            container: container.name.clone(),
            access: container.public_access,
            url: container_url(&account.name, &container.name),
            histogram,
        }
    }

    pub fn total_files(&self) -> usize {
        self.histogram.total()
    }
}

/// Browsing URL of a container.
pub fn container_url(account: &str, container: &str) -> String {
    format!("https://{}.blob.core.windows.net/{}/", account, container)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn key(name: &str, value: &str) -> AccountKey {
        AccountKey {
            name: name.to_string(),
            value: SecretString::from(value.to_string()),
        }
    }

    #[test]
    fn test_public_access_parse() {
        assert_eq!(PublicAccess::parse(Some("blob")), PublicAccess::Blob);
        assert_eq!(PublicAccess::parse(Some("Container")), PublicAccess::Container);
        assert_eq!(PublicAccess::parse(Some("")), PublicAccess::None);
        assert_eq!(PublicAccess::parse(None), PublicAccess::None);
        assert!(!PublicAccess::None.is_public());
        assert!(PublicAccess::Blob.is_public());
    }

    #[test]
    fn test_subscription_state_parse() {
        assert_eq!(SubscriptionState::parse("Enabled"), SubscriptionState::Enabled);
        assert_eq!(
            SubscriptionState::parse("Expired"),
            SubscriptionState::Other("Expired".to_string())
        );
        assert_eq!(SubscriptionState::parse("PastDue").to_string(), "PastDue");
    }

    #[test]
    fn test_primary_key_prefers_key1() {
        let picked = primary_key(vec![key("key2", "b"), key("key1", "a")]).unwrap();
        assert_eq!(picked.name, "key1");
        assert_eq!(picked.value.expose_secret(), "a");
    }

    #[test]
    fn test_primary_key_falls_back_to_first() {
        let picked = primary_key(vec![key("primary", "p"), key("secondary", "s")]).unwrap();
        assert_eq!(picked.name, "primary");
        assert!(primary_key(Vec::new()).is_none());
    }

    #[test]
    fn test_container_url() {
        assert_eq!(
            container_url("acct", "data"),
            "https://acct.blob.core.windows.net/data/"
        );
    }
}
