//! bhunt - Azure public blob container hunter.
//!
//! Audits every subscription the caller can reach and reports blob
//! containers with anonymous read access, with per-extension file counts.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tokio::signal;
use tracing::{debug, error, warn};

use bhunt::Error;
use bhunt::azure::auth::{AzureCliCredential, ClientSecretCredential, TokenCredential};
use bhunt::azure::client::http_client;
use bhunt::azure::{AzureClient, Endpoints};
use bhunt::config::{Args, Config, CredentialSource};
use bhunt::models::Finding;
use bhunt::operator::{AutoOperator, Operator, PromptOperator};
use bhunt::output;
use bhunt::report::CsvReport;
use bhunt::scanner::Scanner;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    if let Err(e) = init_tracing(&config.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    debug!("Starting bhunt - Azure public blob container hunter");

    if let Err(e) = run(config).await {
        if matches!(e.downcast_ref::<Error>(), Some(Error::Cancelled)) {
            println!("{}", "Cancelled, nothing scanned.".yellow());
            return;
        }
        error!("{}", e);
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Main application logic.
async fn run(config: Config) -> Result<()> {
    let http = http_client(config.request_timeout)?;

    let credential: Arc<dyn TokenCredential> = match config.credentials {
        CredentialSource::ServicePrincipal {
            tenant_id,
            client_id,
            client_secret,
        } => Arc::new(ClientSecretCredential::new(
            http.clone(),
            tenant_id,
            client_id,
            client_secret,
        )),
        CredentialSource::AzureCli { tenant_id } => Arc::new(AzureCliCredential::new(tenant_id)),
    };
    let credential_name = credential.name().to_string();

    let client = AzureClient::new(http, credential, Endpoints::default());
    client.verify_credentials().await?;
    println!(
        "{} Authenticated with {}",
        "[+]".green().bold(),
        credential_name.bold()
    );

    // Created before scanning so a report exists even without findings.
    let report = Arc::new(CsvReport::open(
        &config.output,
        config.settings.classifier.extensions(),
        config.clear,
    )?);

    let operator: Arc<dyn Operator> = if config.auto {
        Arc::new(AutoOperator)
    } else {
        Arc::new(PromptOperator::new())
    };

    let scanner = Scanner::new(Arc::new(client), report.clone(), operator, &config.settings);

    // Ctrl-C stops the walk but keeps what was already written; a second
    // one exits immediately.
    let abort = scanner.resilience().abort.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for interrupt signal");
            return;
        }
        warn!("Interrupted, stopping scan and keeping partial results");
        abort.trigger();

        if signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted again, exiting.".red());
            std::process::exit(130);
        }
    });

    let targets = scanner.discover_targets().await?;
    let summary = scanner.scan(targets).await?;

    let findings: Vec<Finding> = summary.findings().cloned().collect();
    output::print_findings(&findings);
    output::print_report_location(report.path(), report.rows_written());

    Ok(())
}

/// Initialize tracing subscriber.
fn init_tracing(log_level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {}", e))?;

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
