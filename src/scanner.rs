//! Hierarchy walker: subscriptions → resource groups → storage accounts →
//! containers → blobs.
//!
//! Every listing goes through a [`Pager`], so remote failures arrive as
//! [`Pull::Skipped`] values and are reported one line at a time. A failure
//! only ever costs the subtree it happened in.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use secrecy::SecretString;
use tracing::{debug, info, warn};

use crate::azure::CloudApi;
use crate::classifier::ExtensionClassifier;
use crate::config::ScanSettings;
use crate::error::{Error, Result};
use crate::models::{Container, Finding, ScanTarget, StorageAccount, Tenant, primary_key};
use crate::operator::Operator;
use crate::output;
use crate::pager::{Attempt, Page, Pager, Pull, Resilience};
use crate::report::FindingSink;

/// How a subscription scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Account keys could not be listed; remaining accounts were abandoned.
    KeysDenied,
    Aborted,
}

/// Result of scanning one subscription.
#[derive(Debug)]
pub struct SubscriptionReport {
    pub target: ScanTarget,
    pub outcome: Outcome,
    pub findings: Vec<Finding>,
    pub resource_groups: usize,
    pub storage_accounts: usize,
    /// Listings or items skipped because of remote errors.
    pub skipped: usize,
}

/// Result of a whole run.
#[derive(Debug, Default)]
pub struct ScanSummary {
    pub reports: Vec<SubscriptionReport>,
}

impl ScanSummary {
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.reports.iter().flat_map(|r| r.findings.iter())
    }

    pub fn finding_count(&self) -> usize {
        self.reports.iter().map(|r| r.findings.len()).sum()
    }

    pub fn aborted(&self) -> bool {
        self.reports.iter().any(|r| r.outcome == Outcome::Aborted)
    }
}

/// Items of a drained listing plus how the listing ended.
struct Listing<T> {
    items: Vec<T>,
    complete: bool,
    aborted: bool,
}

/// Per-subscription walk state.
struct Walk {
    findings: Vec<Finding>,
    skipped: usize,
}

impl Walk {
    fn skip(&mut self, resource: &str, err: &Error) {
        self.skipped += 1;
        warn!(resource = resource, error = %err, "Skipping");
        output::print_skip(resource, err);
    }
}

async fn drain<T, F, Fut>(mut pager: Pager<T, F>, walk: &mut Walk) -> Listing<T>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut listing = Listing {
        items: Vec::new(),
        complete: true,
        aborted: false,
    };

    while let Some(pull) = pager.next().await {
        match pull {
            Pull::Abort => {
                listing.aborted = true;
                break;
            }
            Pull::Item(item) => listing.items.push(item),
            Pull::Skipped(err) => {
                walk.skip(pager.resource(), &err);
                listing.complete = false;
            }
            Pull::End => break,
        }
    }

    listing
}

enum AccountScan {
    Done,
    KeysDenied,
    Aborted,
}

pub struct Scanner {
    api: Arc<dyn CloudApi>,
    sink: Arc<dyn FindingSink>,
    resilience: Resilience,
    classifier: ExtensionClassifier,
    concurrency: usize,
}

impl Scanner {
    pub fn new(
        api: Arc<dyn CloudApi>,
        sink: Arc<dyn FindingSink>,
        operator: Arc<dyn Operator>,
        settings: &ScanSettings,
    ) -> Self {
        Self {
            api,
            sink,
            resilience: Resilience::new(settings.throttle, operator),
            classifier: settings.classifier.clone(),
            concurrency: settings.concurrency.max(1),
        }
    }

    pub fn resilience(&self) -> &Resilience {
        &self.resilience
    }

    /// List tenants and subscriptions, keep the enabled ones and let the
    /// operator choose among them.
    pub async fn discover_targets(&self) -> Result<Vec<ScanTarget>> {
        let mut walk = Walk {
            findings: Vec::new(),
            skipped: 0,
        };

        let api = &self.api;
        let tenants = drain(
            Pager::new("tenants", self.resilience.clone(), move |cursor| {
                api.list_tenants(cursor)
            }),
            &mut walk,
        )
        .await;
        if tenants.aborted {
            return Err(Error::Cancelled);
        }

        let subscriptions = drain(
            Pager::new("subscriptions", self.resilience.clone(), move |cursor| {
                api.list_subscriptions(cursor)
            }),
            &mut walk,
        )
        .await;
        if subscriptions.aborted {
            return Err(Error::Cancelled);
        }

        output::print_discovery(subscriptions.items.len(), tenants.items.len());

        let tenant_names: HashMap<String, String> = tenants
            .items
            .into_iter()
            .map(|t| (t.id, t.name))
            .collect();

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for subscription in subscriptions.items {
            if !seen.insert(subscription.id.clone()) {
                debug!(subscription = %subscription.id, "Duplicate subscription in listing");
                continue;
            }
            let tenant = Tenant {
                name: tenant_names
                    .get(&subscription.tenant_id)
                    .cloned()
                    .unwrap_or_default(),
                id: subscription.tenant_id.clone(),
            };
            let target = ScanTarget {
                tenant,
                subscription,
            };

            if target.subscription.is_enabled() {
                candidates.push(target);
            } else {
                info!(
                    subscription = %target.subscription.id,
                    state = %target.subscription.state,
                    "Skipping subscription that is not enabled"
                );
                output::print_subscription_skipped(&target);
            }
        }

        self.resilience.operator.select_subscriptions(candidates)
    }

    /// Scan every target, sequentially or up to `concurrency` at a time.
    ///
    /// Only report write failures are returned as errors.
    pub async fn scan(&self, targets: Vec<ScanTarget>) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();

        if self.concurrency <= 1 {
            for target in targets {
                if self.resilience.abort.is_triggered() {
                    break;
                }
                summary.reports.push(self.scan_subscription(&target).await?);
            }
        } else {
            debug!("Scanning up to {} subscriptions concurrently", self.concurrency);
            let results: Vec<Result<SubscriptionReport>> = stream::iter(targets)
                .map(|target| async move { self.scan_subscription(&target).await })
                .buffered(self.concurrency)
                .collect()
                .await;
            for result in results {
                summary.reports.push(result?);
            }
        }

        if summary.aborted() {
            output::print_aborted();
        }
        Ok(summary)
    }

    /// Walk one subscription down to its blobs.
    pub async fn scan_subscription(&self, target: &ScanTarget) -> Result<SubscriptionReport> {
        let mut walk = Walk {
            findings: Vec::new(),
            skipped: 0,
        };
        let mut report = SubscriptionReport {
            target: target.clone(),
            outcome: Outcome::Completed,
            findings: Vec::new(),
            resource_groups: 0,
            storage_accounts: 0,
            skipped: 0,
        };

        if self.resilience.abort.is_triggered() {
            report.outcome = Outcome::Aborted;
            return Ok(report);
        }

        output::print_subscription_start(target);
        let outcome = self.walk_subscription(target, &mut walk, &mut report).await?;

        info!(
            subscription = %target.subscription.id,
            outcome = ?outcome,
            findings = walk.findings.len(),
            skipped = walk.skipped,
            "Subscription scan finished"
        );

        report.outcome = outcome;
        report.findings = walk.findings;
        report.skipped = walk.skipped;
        Ok(report)
    }

    async fn walk_subscription(
        &self,
        target: &ScanTarget,
        walk: &mut Walk,
        report: &mut SubscriptionReport,
    ) -> Result<Outcome> {
        let api = &self.api;
        let subscription_id = target.subscription.id.as_str();

        let groups = drain(
            Pager::new(
                format!("{} resource groups", target.subscription.name),
                self.resilience.clone(),
                move |cursor| api.list_resource_groups(subscription_id, cursor),
            ),
            walk,
        )
        .await;
        report.resource_groups = groups.items.len();
        output::print_count(groups.items.len(), "resource group(s)");
        if groups.aborted {
            return Ok(Outcome::Aborted);
        }

        // Ordered group → distinct accounts.
        let mut accounts_by_group: Vec<(String, Vec<StorageAccount>)> = Vec::new();
        for group in &groups.items {
            let group_name = group.name.as_str();
            let listing = drain(
                Pager::new(
                    format!("{} storage accounts", group_name),
                    self.resilience.clone(),
                    move |cursor| api.list_storage_accounts(subscription_id, group_name, cursor),
                ),
                walk,
            )
            .await;

            let mut seen = HashSet::new();
            let accounts: Vec<StorageAccount> = listing
                .items
                .into_iter()
                .filter(|a| seen.insert(a.name.clone()))
                .collect();
            report.storage_accounts += accounts.len();
            accounts_by_group.push((group.name.clone(), accounts));

            if listing.aborted {
                return Ok(Outcome::Aborted);
            }
        }
        output::print_count(report.storage_accounts, "storage account(s)");

        for (group, accounts) in &accounts_by_group {
            for account in accounts {
                match self.scan_account(target, group, account, walk).await? {
                    AccountScan::Done => {}
                    AccountScan::KeysDenied => return Ok(Outcome::KeysDenied),
                    AccountScan::Aborted => return Ok(Outcome::Aborted),
                }
            }
        }

        Ok(Outcome::Completed)
    }

    async fn scan_account(
        &self,
        target: &ScanTarget,
        group: &str,
        account: &StorageAccount,
        walk: &mut Walk,
    ) -> Result<AccountScan> {
        let api = &self.api;
        let subscription_id = target.subscription.id.as_str();
        let account_name = account.name.as_str();
        let key_resource = format!("{} keys", account_name);

        let keys = self
            .resilience
            .call(&key_resource, move || {
                api.list_account_keys(subscription_id, group, account_name)
            })
            .await;

        let key = match keys {
            Attempt::Done(keys) => match primary_key(keys) {
                Some(key) => key,
                None => {
                    walk.skip(&key_resource, &Error::NotFound(key_resource.clone()));
                    return Ok(AccountScan::Done);
                }
            },
            Attempt::Failed(err) if err.is_permission_denied() => {
                warn!(account = account_name, error = %err, "Cannot list account keys");
                output::print_keys_denied(target, account_name);
                return Ok(AccountScan::KeysDenied);
            }
            Attempt::Failed(err) => {
                walk.skip(&key_resource, &err);
                return Ok(AccountScan::Done);
            }
            Attempt::Aborted => return Ok(AccountScan::Aborted),
        };
        debug!(account = account_name, key = %key.name, "Using account key");

        let secret = &key.value;
        let mut containers = Pager::new(
            format!("{} containers", account_name),
            self.resilience.clone(),
            move |cursor| api.list_containers(account_name, secret, cursor),
        );

        while let Some(pull) = containers.next().await {
            match pull {
                Pull::Abort => return Ok(AccountScan::Aborted),
                Pull::Item(container) if container.public_access.is_public() => {
                    let finding = self
                        .scan_container(target, account, &container, secret, walk)
                        .await;
                    self.emit(finding, walk)?;

                    if self.resilience.abort.is_triggered() {
                        return Ok(AccountScan::Aborted);
                    }
                }
                Pull::Item(container) => {
                    debug!(
                        account = account_name,
                        container = %container.name,
                        "Container is private"
                    );
                }
                Pull::Skipped(err) => walk.skip(containers.resource(), &err),
                Pull::End => break,
            }
        }

        Ok(AccountScan::Done)
    }

    /// List a public container's blobs and build its finding. A partial
    /// listing still produces a finding.
    async fn scan_container(
        &self,
        target: &ScanTarget,
        account: &StorageAccount,
        container: &Container,
        key: &SecretString,
        walk: &mut Walk,
    ) -> Finding {
        let api = &self.api;
        let account_name = account.name.as_str();
        let container_name = container.name.as_str();
        let resource = format!("{}/{}", account_name, container_name);

        let blobs = drain(
            Pager::new(resource.clone(), self.resilience.clone(), move |cursor| {
                api.list_blobs(account_name, container_name, key, cursor)
            }),
            walk,
        )
        .await;

        if !blobs.complete || blobs.aborted {
            output::print_partial_listing(&resource);
        }

        Finding::new(target, account, container, self.classifier.classify(&blobs.items))
    }

    fn emit(&self, finding: Finding, walk: &mut Walk) -> Result<()> {
        output::print_finding(&finding);
        self.sink.record(&finding)?;
        walk.findings.push(finding);
        Ok(())
    }
}
