//! Warehouse abstraction and the BigQuery implementation.
//!
//! The pipeline only needs three capabilities from a warehouse: look up a
//! dataset, create a dataset, and load a batch of JSON records into a table.
//! [`Warehouse`] captures exactly those, so the provisioner and loader can be
//! driven by [`BigQueryClient`] in production and by a stub in tests.

mod auth;
mod bigquery;

pub use auth::{Credentials, KeyFile, TokenProvider};
pub use bigquery::BigQueryClient;

use crate::types::{DatasetHandle, Record, TableTarget, WriteMode};
use async_trait::async_trait;

/// Result of creating a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The dataset was created by this call
    Created,
    /// Another caller created it first
    AlreadyExists,
}

/// A completed load job
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJob {
    /// Warehouse job identifier
    pub job_id: String,
    /// Rows the warehouse reports as written, when it reports them
    pub output_rows: Option<u64>,
}

/// Operations the ingest pipeline performs against a warehouse
///
/// Implementations are expected to block (await) until each operation has
/// reached a terminal state; none of the callers poll.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Whether the dataset exists
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup itself fails (permissions, transport).
    async fn dataset_exists(&self, dataset: &DatasetHandle) -> crate::Result<bool>;

    /// Create the dataset with its location and a description
    ///
    /// Must report [`CreateOutcome::AlreadyExists`] rather than an error when
    /// the dataset already exists.
    ///
    /// # Errors
    ///
    /// Returns an error for any other creation failure.
    async fn create_dataset(
        &self,
        dataset: &DatasetHandle,
        description: &str,
    ) -> crate::Result<CreateOutcome>;

    /// Load `records` into `table` as one job with an autodetected schema
    ///
    /// The table is created if needed. Returns once the job is done.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`](crate::LoadError) if the job is rejected or finishes
    /// with an error result.
    async fn load_json(
        &self,
        table: &TableTarget,
        records: &[Record],
        write_mode: WriteMode,
    ) -> crate::Result<LoadJob>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
