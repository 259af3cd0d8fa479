//! Fetch-then-load orchestration.
//!
//! A [`Pipeline`] binds the PBDB fetcher to one warehouse dataset. Building it
//! provisions the dataset; each [`run_once`](Pipeline::run_once) call then
//! performs exactly one fetch followed by one load. [`run_to_end`](Pipeline::run_to_end)
//! walks the whole result set by repeating `run_once` with a moving offset.
//!
//! Every stage is awaited to completion before the next one starts, so for a
//! single pipeline the fetch of a page always precedes its load and pages are
//! processed strictly in order.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetcher::OccurrenceFetcher;
use crate::loader;
use crate::provision::ensure_dataset;
use crate::types::{DatasetHandle, RunRequest, RunSummary, TraversalSummary, WriteMode};
use crate::warehouse::{BigQueryClient, Credentials, Warehouse};
use std::sync::Arc;
use tracing::{debug, info};

/// The ingest pipeline
///
/// Holds no state between runs beyond the provisioned dataset handle and the
/// clients, which are reused without re-authenticating.
pub struct Pipeline {
    fetcher: OccurrenceFetcher,
    warehouse: Arc<dyn Warehouse>,
    dataset: DatasetHandle,
}

impl Pipeline {
    /// Build a pipeline backed by BigQuery
    ///
    /// Resolves credentials from `config.warehouse.credentials_path` or the
    /// environment, applies a key-file project if the configured project was
    /// left at the default, then provisions the dataset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid configuration, unusable credentials,
    /// or a dataset that cannot be provisioned.
    pub async fn connect(mut config: Config) -> Result<Self> {
        config.validate()?;
        let credentials = Credentials::resolve(config.warehouse.credentials_path.as_deref())?;
        config
            .warehouse
            .adopt_key_file_project(credentials.project_id());
        let client = BigQueryClient::new(&config.warehouse, credentials)?;
        Self::new(&config, Arc::new(client)).await
    }

    /// Build a pipeline on top of an existing warehouse
    ///
    /// The dataset named by `config.warehouse` is provisioned before this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid configuration or a dataset that
    /// cannot be provisioned.
    pub async fn new(config: &Config, warehouse: Arc<dyn Warehouse>) -> Result<Self> {
        config.validate()?;
        let fetcher = OccurrenceFetcher::new(&config.source)?;
        let dataset = config.warehouse.dataset_handle();

        info!(
            dataset = %dataset,
            warehouse = warehouse.name(),
            source = %fetcher.url(),
            "initializing pipeline"
        );
        ensure_dataset(warehouse.as_ref(), &dataset, &config.warehouse.description).await?;

        Ok(Self {
            fetcher,
            warehouse,
            dataset,
        })
    }

    /// Dataset this pipeline writes to
    pub fn dataset(&self) -> &DatasetHandle {
        &self.dataset
    }

    /// Fetcher this pipeline reads from
    pub fn fetcher(&self) -> &OccurrenceFetcher {
        &self.fetcher
    }

    /// Fetch one page and load it
    ///
    /// The request's write mode is passed to the loader unchanged. An empty
    /// page is a successful run that loads nothing.
    ///
    /// # Errors
    ///
    /// Returns the fetch or load error that aborted the run. A fetch failure
    /// means nothing was loaded; a load failure leaves the table as it was.
    pub async fn run_once(&self, request: &RunRequest) -> Result<RunSummary> {
        let table = self.dataset.table(&request.table_id);
        debug!(
            table = %table,
            limit = request.limit,
            offset = request.offset,
            write_mode = %request.write_mode,
            "starting run"
        );

        let records = self
            .fetcher
            .fetch(request.limit, request.offset, &request.filters)
            .await?;
        let fetched = records.len();
        let load = loader::load(
            self.warehouse.as_ref(),
            &table,
            &records,
            request.write_mode,
        )
        .await?;

        Ok(RunSummary {
            table,
            offset: request.offset,
            fetched,
            load,
        })
    }

    /// Walk the result set page by page starting at `request.offset`
    ///
    /// Each page starts where the previous one ended, so a server that returns
    /// fewer rows than `request.limit` is walked without gaps. Stops after an
    /// empty page or `max_pages` pages; only the empty page marks the
    /// traversal as exhausted. The requested write mode applies to the first
    /// page only; later pages are appended so `Truncate` and `Empty` act on
    /// the traversal as a whole.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `request.limit` is zero, otherwise the error
    /// of the first failing page. Pages loaded before the failure stay loaded.
    pub async fn run_to_end(
        &self,
        request: &RunRequest,
        max_pages: Option<u32>,
    ) -> Result<TraversalSummary> {
        if request.limit == 0 {
            return Err(Error::config(
                "page size must be greater than zero to walk the corpus",
                "limit",
            ));
        }

        let mut summary = TraversalSummary {
            next_offset: request.offset,
            ..Default::default()
        };
        let mut write_mode = request.write_mode;

        while max_pages.is_none_or(|max| summary.pages < max) {
            let page = RunRequest {
                offset: summary.next_offset,
                write_mode,
                ..request.clone()
            };
            let run = self.run_once(&page).await?;

            summary.pages += 1;
            if run.fetched == 0 {
                summary.exhausted = true;
                break;
            }
            summary.rows_loaded += run.load.rows();
            summary.next_offset += run.fetched as u64;
            write_mode = WriteMode::Append;
        }

        info!(
            table = %self.dataset.table(&request.table_id),
            pages = summary.pages,
            rows_loaded = summary.rows_loaded,
            next_offset = summary.next_offset,
            exhausted = summary.exhausted,
            "traversal finished"
        );
        Ok(summary)
    }
}
