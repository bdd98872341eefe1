//! bhunt - find publicly accessible Azure blob containers.
//!
//! Walks tenant → subscription → resource group → storage account →
//! container → blob through the Azure REST APIs and writes a CSV report of
//! every container that allows anonymous access.

pub mod azure;
pub mod classifier;
pub mod config;
pub mod error;
pub mod models;
pub mod operator;
pub mod output;
pub mod pager;
pub mod report;
pub mod scanner;

pub use error::{Error, Result};
