//! CLI configuration and argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use clap::Parser;
use secrecy::SecretString;

use crate::classifier::{DEFAULT_EXTENSIONS, ExtensionClassifier};
use crate::error::{Error, Result};
use crate::pager::ThrottlePolicy;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Azure public blob container hunter.
///
/// Walks every reachable tenant, subscription, resource group and storage
/// account, and reports blob containers that allow anonymous access.
#[derive(Parser, Debug, Clone)]
#[command(name = "bhunt")]
#[command(about = "Find publicly accessible Azure blob containers")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    /// Service principal application (client) id
    #[arg(short, long, env = "AZURE_CLIENT_ID")]
    pub app_id: Option<String>,

    /// Service principal client secret
    #[arg(short = 's', long, env = "AZURE_CLIENT_SECRET", hide_env_values = true)]
    pub app_secret: Option<String>,

    /// Tenant id used to authenticate
    #[arg(short, long, env = "AZURE_TENANT_ID")]
    pub tenant: Option<String>,

    /// Report file (default: public-containers-YYYY-MM-DD.csv)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Scan every enabled subscription and always wait out rate limits
    #[arg(long, default_value = "false")]
    pub auto: bool,

    /// Remove an existing report file before scanning
    #[arg(long, default_value = "false")]
    pub clear: bool,

    /// Tracked file extensions, comma separated
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = DEFAULT_EXTENSIONS.iter().map(|e| e.to_string())
    )]
    pub extensions: Vec<String>,

    /// Seconds added to the server's Retry-After before retrying
    #[arg(long, default_value = "10")]
    pub throttle_margin: u64,

    /// Consecutive rate limits tolerated on one page before skipping it
    #[arg(long, default_value = "1")]
    pub max_throttle_retries: u32,

    /// Subscriptions scanned concurrently
    #[arg(long, default_value = "1")]
    pub concurrency: usize,

    /// HTTP request timeout in seconds
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "BHUNT_LOG_LEVEL")]
    pub log_level: String,
}

/// How to obtain Resource Manager tokens.
#[derive(Debug)]
pub enum CredentialSource {
    ServicePrincipal {
        tenant_id: String,
        client_id: String,
        client_secret: SecretString,
    },
    /// Reuse `az login`, optionally pinned to a tenant.
    AzureCli { tenant_id: Option<String> },
}

/// Knobs threaded into the walker.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub classifier: ExtensionClassifier,
    pub throttle: ThrottlePolicy,
    pub concurrency: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            classifier: ExtensionClassifier::default(),
            throttle: ThrottlePolicy::default(),
            concurrency: 1,
        }
    }
}

/// Application configuration derived from CLI args.
#[derive(Debug)]
pub struct Config {
    pub credentials: CredentialSource,
    pub output: PathBuf,
    pub auto: bool,
    pub clear: bool,
    pub settings: ScanSettings,
    pub request_timeout: Duration,
    pub log_level: String,
}

impl Config {
    /// Create config from CLI arguments.
    pub fn from_args(args: Args) -> Result<Self> {
        let credentials = match (args.app_id, args.app_secret) {
            (Some(client_id), Some(secret)) => {
                let tenant_id = args.tenant.ok_or_else(|| {
                    Error::Config("--tenant is required with --app-id and --app-secret".to_string())
                })?;
                CredentialSource::ServicePrincipal {
                    tenant_id,
                    client_id,
                    client_secret: SecretString::from(secret),
                }
            }
            (None, None) => CredentialSource::AzureCli {
                tenant_id: args.tenant,
            },
            _ => {
                return Err(Error::Config(
                    "--app-id and --app-secret must be given together".to_string(),
                ));
            }
        };

        if args.concurrency == 0 {
            return Err(Error::Config("--concurrency must be at least 1".to_string()));
        }
        if args.timeout == 0 {
            return Err(Error::Config("--timeout must be at least 1 second".to_string()));
        }

        let extensions = normalize_extensions(&args.extensions);
        if extensions.is_empty() {
            return Err(Error::Config("--extensions must name at least one extension".to_string()));
        }

        Ok(Self {
            credentials,
            output: args.output.unwrap_or_else(default_report_path),
            auto: args.auto,
            clear: args.clear,
            settings: ScanSettings {
                classifier: ExtensionClassifier::new(extensions),
                throttle: ThrottlePolicy {
                    margin: Duration::from_secs(args.throttle_margin),
                    max_retries: args.max_throttle_retries,
                },
                concurrency: args.concurrency,
            },
            request_timeout: Duration::from_secs(args.timeout),
            log_level: args.log_level,
        })
    }
}

/// `public-containers-YYYY-MM-DD.csv` in the working directory.
pub fn default_report_path() -> PathBuf {
    PathBuf::from(format!(
        "public-containers-{}.csv",
        Local::now().format("%Y-%m-%d")
    ))
}

/// Trim, drop a leading dot, and remove blanks and duplicates keeping order.
fn normalize_extensions(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for ext in raw {
        let ext = ext.trim().trim_start_matches('.');
        if !ext.is_empty() && !out.iter().any(|e| e == ext) {
            out.push(ext.to_string());
        }
    }
    out
}
