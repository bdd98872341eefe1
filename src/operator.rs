//! Operator decisions: throttle waits and subscription selection.
//!
//! The scan logic is identical in unattended and interactive mode; only the
//! [`Operator`] implementation differs.

use std::sync::Mutex;
use std::time::Duration;

use colored::Colorize;
use dialoguer::{Confirm, MultiSelect, Select, theme::ColorfulTheme};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::ScanTarget;

/// Answer to a rate-limit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Sleep for the advertised wait and retry the same cursor.
    Wait,
    /// Stop the scan and keep what was found so far.
    Abort,
}

pub trait Operator: Send + Sync {
    /// Decide what to do when `resource` is rate limited for `wait`.
    fn on_throttle(&self, resource: &str, wait: Duration) -> ThrottleDecision;

    /// Choose which enabled subscriptions to scan.
    fn select_subscriptions(&self, candidates: Vec<ScanTarget>) -> Result<Vec<ScanTarget>>;
}

/// Unattended mode: always wait, always scan everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoOperator;

impl Operator for AutoOperator {
    fn on_throttle(&self, resource: &str, wait: Duration) -> ThrottleDecision {
        debug!("Auto mode: waiting {}s for {}", wait.as_secs(), resource);
        ThrottleDecision::Wait
    }

    fn select_subscriptions(&self, candidates: Vec<ScanTarget>) -> Result<Vec<ScanTarget>> {
        Ok(candidates)
    }
}

/// Interactive mode backed by terminal prompts.
#[derive(Default)]
pub struct PromptOperator {
    // Concurrent subscription scans must not interleave prompts.
    prompt_lock: Mutex<()>,
}

impl PromptOperator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Operator for PromptOperator {
    fn on_throttle(&self, resource: &str, wait: Duration) -> ThrottleDecision {
        let _guard = self.prompt_lock.lock().unwrap_or_else(|e| e.into_inner());

        println!(
            "\t\t{} Rate limited while listing {} (retry in {}s)",
            "[!]".yellow().bold(),
            resource.bold(),
            wait.as_secs()
        );

        let items = [
            format!("Wait {} seconds and continue", wait.as_secs()),
            "Stop scanning and keep partial results".to_string(),
        ];

        match Select::with_theme(&ColorfulTheme::default())
            .with_prompt("How do you want to proceed?")
            .items(&items)
            .default(0)
            .interact()
        {
            Ok(0) => ThrottleDecision::Wait,
            Ok(_) => ThrottleDecision::Abort,
            Err(e) => {
                warn!("Throttle prompt failed ({}), waiting instead", e);
                ThrottleDecision::Wait
            }
        }
    }

    fn select_subscriptions(&self, candidates: Vec<ScanTarget>) -> Result<Vec<ScanTarget>> {
        if candidates.len() <= 1 {
            return Ok(candidates);
        }

        let _guard = self.prompt_lock.lock().unwrap_or_else(|e| e.into_inner());

        let scan_all = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Scan all {} subscriptions?", candidates.len()))
            .default(true)
            .interact()?;

        if scan_all {
            return Ok(candidates);
        }

        let items: Vec<String> = candidates.iter().map(|t| t.to_string()).collect();
        let picked = MultiSelect::with_theme(&ColorfulTheme::default())
            .with_prompt("Select subscriptions (space to toggle, enter to confirm)")
            .items(&items)
            .interact()?;

        if picked.is_empty() {
            return Err(Error::Cancelled);
        }

        Ok(candidates
            .into_iter()
            .enumerate()
            .filter(|(i, _)| picked.contains(i))
            .map(|(_, t)| t)
            .collect())
    }
}
