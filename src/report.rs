//! CSV report of exposed containers.
//!
//! Rows are appended and flushed one finding at a time so a partial scan still
//! leaves a usable report behind.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::Finding;

const FIXED_COLUMNS: &[&str] = &[
    "Tenant ID",
    "Tenant Name",
    "Subscription ID",
    "Subscription Name",
    "Resource Group",
    "Storage Account",
    "Container",
    "Public Access Level",
    "URL",
    "Total Files",
];

const OTHER_COLUMN: &str = "others";

/// Destination for findings as soon as they are made.
pub trait FindingSink: Send + Sync {
    fn record(&self, finding: &Finding) -> Result<()>;
}

/// Report header for the given tracked extensions.
pub fn header(extensions: &[String]) -> Vec<String> {
    FIXED_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(extensions.iter().cloned())
        .chain(std::iter::once(OTHER_COLUMN.to_string()))
        .collect()
}

/// One report row, columns aligned with [`header`].
pub fn row(finding: &Finding) -> Vec<String> {
    let mut row = vec![
        finding.tenant_id.clone(),
        finding.tenant_name.clone(),
        finding.subscription_id.clone(),
        finding.subscription_name.clone(),
        finding.resource_group.clone(),
        finding.storage_account.clone(),
        finding.container.clone(),
        finding.access.to_string(),
        finding.url.clone(),
        finding.total_files().to_string(),
    ];
    row.extend(finding.histogram.counts().map(|n| n.to_string()));
    row.push(finding.histogram.other().to_string());
    row
}

/// Append-only CSV file with a single header.
pub struct CsvReport {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
    rows: AtomicUsize,
}

impl CsvReport {
    /// Open `path` for appending, writing the header only if the file is new
    /// or empty. With `clear`, an existing file is removed first.
    pub fn open(path: impl AsRef<Path>, extensions: &[String], clear: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if clear && path.exists() {
            fs::remove_file(&path)?;
            info!("Removed previous report {}", path.display());
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_empty = file.metadata()?.len() == 0;
        let header = header(extensions);

        if !is_empty {
            check_existing_header(&path, &header)?;
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_empty {
            writer.write_record(&header)?;
            writer.flush()?;
            debug!("Wrote report header to {}", path.display());
        }

        Ok(Self {
            path,
            writer: Mutex::new(writer),
            rows: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written by this run.
    pub fn rows_written(&self) -> usize {
        self.rows.load(Ordering::SeqCst)
    }
}

fn check_existing_header(path: &Path, expected: &[String]) -> Result<()> {
    let mut first = String::new();
    BufReader::new(File::open(path)?).read_line(&mut first)?;

    let existing: Vec<&str> = first.trim_end().split(',').collect();
    if existing != expected.iter().map(String::as_str).collect::<Vec<_>>() {
        warn!(
            "Existing report {} has different columns; appending anyway (use --clear to start over)",
            path.display()
        );
    }
    Ok(())
}

impl FindingSink for CsvReport {
    fn record(&self, finding: &Finding) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| Error::Report("report writer lock poisoned".to_string()))?;

        writer.write_record(row(finding))?;
        writer.flush()?;
        self.rows.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
