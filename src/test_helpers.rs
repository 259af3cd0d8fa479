//! Shared test helpers: an in-memory warehouse and record builders.

use crate::error::{Error, LoadError, Result};
use crate::types::{DatasetHandle, Record, TableTarget, WriteMode};
use crate::warehouse::{CreateOutcome, LoadJob, Warehouse};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Build a record `{"id": id}`
pub(crate) fn record(id: i64) -> Record {
    let mut r = Record::new();
    r.insert("id".into(), json!(id));
    r
}

/// One load the stub accepted
#[derive(Debug, Clone)]
pub(crate) struct RecordedLoad {
    pub(crate) table: TableTarget,
    pub(crate) records: Vec<Record>,
    pub(crate) write_mode: WriteMode,
}

/// Warehouse double that counts calls and keeps every load in memory
#[derive(Default)]
pub(crate) struct StubWarehouse {
    datasets: Mutex<HashSet<DatasetHandle>>,
    loads: Mutex<Vec<RecordedLoad>>,
    lookups: AtomicUsize,
    creates: AtomicUsize,
    create_conflicts: bool,
    create_failure: Option<String>,
    load_failure: Option<String>,
}

impl StubWarehouse {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_dataset(self, dataset: DatasetHandle) -> Self {
        self.datasets.lock().unwrap().insert(dataset);
        self
    }

    /// Every create answers "already exists", as if another process won the race
    pub(crate) fn creating_reports_conflict(mut self) -> Self {
        self.create_conflicts = true;
        self
    }

    pub(crate) fn failing_create(mut self, message: &str) -> Self {
        self.create_failure = Some(message.to_string());
        self
    }

    pub(crate) fn failing_load(mut self, message: &str) -> Self {
        self.load_failure = Some(message.to_string());
        self
    }

    pub(crate) fn lookup_calls(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub(crate) fn load_calls(&self) -> usize {
        self.loads.lock().unwrap().len()
    }

    pub(crate) fn loads(&self) -> Vec<RecordedLoad> {
        self.loads.lock().unwrap().clone()
    }

    pub(crate) fn has_dataset(&self, dataset: &DatasetHandle) -> bool {
        self.datasets.lock().unwrap().contains(dataset)
    }
}

#[async_trait]
impl Warehouse for StubWarehouse {
    async fn dataset_exists(&self, dataset: &DatasetHandle) -> Result<bool> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.has_dataset(dataset))
    }

    async fn create_dataset(
        &self,
        dataset: &DatasetHandle,
        _description: &str,
    ) -> Result<CreateOutcome> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.create_failure {
            return Err(Error::Warehouse {
                operation: "create_dataset".into(),
                status: 403,
                message: message.clone(),
            });
        }
        if self.create_conflicts {
            return Ok(CreateOutcome::AlreadyExists);
        }
        self.datasets.lock().unwrap().insert(dataset.clone());
        Ok(CreateOutcome::Created)
    }

    async fn load_json(
        &self,
        table: &TableTarget,
        records: &[Record],
        write_mode: WriteMode,
    ) -> Result<LoadJob> {
        if let Some(message) = &self.load_failure {
            return Err(LoadError::JobFailed {
                job_id: "stub_job_failed".into(),
                table: table.to_string(),
                reason: message.clone(),
                errors: vec![message.clone()],
            }
            .into());
        }
        let mut loads = self.loads.lock().unwrap();
        loads.push(RecordedLoad {
            table: table.clone(),
            records: records.to_vec(),
            write_mode,
        });
        Ok(LoadJob {
            job_id: format!("stub_job_{}", loads.len()),
            output_rows: Some(records.len() as u64),
        })
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
