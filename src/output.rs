//! Console output: scan progress, skip diagnostics and the final summary.

pub mod table;

use colored::Colorize;

use crate::error::Error;
use crate::models::{Finding, ScanTarget};

pub use table::print_findings;

pub fn print_discovery(subscriptions: usize, tenants: usize) {
    println!(
        "{} Found {} subscription(s) across {} tenant(s)",
        "[+]".green().bold(),
        subscriptions.to_string().bold(),
        tenants
    );
}

pub fn print_subscription_skipped(target: &ScanTarget) {
    println!(
        "{} Skipping subscription {} (state: {})",
        "[-]".dimmed(),
        target,
        target.subscription.state
    );
}

pub fn print_subscription_start(target: &ScanTarget) {
    println!(
        "{} Checking subscription {}",
        "[*]".cyan().bold(),
        target.to_string().bold()
    );
}

pub fn print_count(count: usize, what: &str) {
    println!("\t{} Found {} {}", "[+]".green(), count, what);
}

/// One-line diagnostic for anything the scan had to skip.
pub fn print_skip(resource: &str, err: &Error) {
    println!(
        "\t{} Skipping {}: {}",
        "[-]".yellow(),
        resource,
        err.reason().yellow()
    );
}

pub fn print_keys_denied(target: &ScanTarget, account: &str) {
    println!(
        "\t{} Cannot list keys of {} in {}; skipping the rest of this subscription",
        "[-]".red(),
        account.bold(),
        target
    );
}

pub fn print_finding(finding: &Finding) {
    println!(
        "\t\t{} Public container: {} ({}, {} files)",
        "[!]".red().bold(),
        finding.url.bold(),
        finding.access,
        finding.total_files()
    );
}

pub fn print_partial_listing(resource: &str) {
    println!(
        "\t\t{} Object listing of {} stopped early; counts are partial",
        "[-]".yellow(),
        resource
    );
}

pub fn print_aborted() {
    println!(
        "{} Scan stopped by operator; keeping partial results",
        "[!]".yellow().bold()
    );
}

pub fn print_report_location(path: &std::path::Path, rows: usize) {
    println!();
    println!(
        "{} {} row(s) written to {}",
        "[+]".green().bold(),
        rows,
        path.display().to_string().bold()
    );
}
