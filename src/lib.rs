//! # pbdb-ingest
//!
//! Fetch occurrence records from the Paleobiology Database (PBDB) API and load
//! them, minimally transformed, into a BigQuery dataset.
//!
//! ## Design Philosophy
//!
//! pbdb-ingest is designed to be:
//! - **Small and explicit** - One fetch, one load per run; no hidden loops or retries
//! - **Idempotent to start** - The target dataset is created on first use and left alone after
//! - **Library-first** - Scheduling, retries, and process wiring belong to the caller
//! - **Testable** - The warehouse sits behind a trait; the API is plain HTTP
//!
//! ## Quick Start
//!
//! ```no_run
//! use pbdb_ingest::{Config, Filters, Pipeline, RunRequest, WriteMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::connect(Config::from_env()).await?;
//!
//!     let filters = Filters::new().with("base_name", "Dinosauria")?;
//!     let request = RunRequest::new("occurrences", filters)
//!         .limit(1000)
//!         .offset(0)
//!         .write_mode(WriteMode::Append);
//!
//!     let summary = pipeline.run_once(&request).await?;
//!     println!("loaded {} records", summary.load.rows());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// PBDB occurrence fetching
pub mod fetcher;
/// Batch loading
pub mod loader;
/// Fetch-then-load orchestration
pub mod pipeline;
/// Dataset provisioning
pub mod provision;
/// Core types
pub mod types;
/// Warehouse abstraction and BigQuery client
pub mod warehouse;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::{Config, SourceConfig, WarehouseConfig};
pub use error::{Error, FetchError, LoadError, Result};
pub use fetcher::OccurrenceFetcher;
pub use pipeline::Pipeline;
pub use types::{
    DatasetHandle, FilterValue, Filters, LoadOutcome, Page, QueryParams, Record, RunRequest,
    RunSummary, TableTarget, TraversalSummary, WriteMode,
};
pub use warehouse::{BigQueryClient, CreateOutcome, Credentials, LoadJob, Warehouse};
