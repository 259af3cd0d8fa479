//! Batch loading into the warehouse

use crate::error::Result;
use crate::types::{LoadOutcome, Record, TableTarget, WriteMode};
use crate::warehouse::Warehouse;
use tracing::{info, warn};

/// Load one batch of records into `table`
///
/// An empty batch is skipped without contacting the warehouse. Otherwise the
/// batch is submitted as a single load job with an autodetected schema and the
/// requested write mode, and this call returns once the job has finished.
///
/// # Errors
///
/// Returns [`LoadError`](crate::LoadError) if the job is rejected or fails
/// (schema mismatch, quota, a non-empty table under [`WriteMode::Empty`]).
/// Not retried.
pub async fn load(
    warehouse: &dyn Warehouse,
    table: &TableTarget,
    records: &[Record],
    write_mode: WriteMode,
) -> Result<LoadOutcome> {
    if records.is_empty() {
        warn!(table = %table, "no records to load");
        return Ok(LoadOutcome::Skipped);
    }

    let job = warehouse.load_json(table, records, write_mode).await?;

    if let Some(written) = job.output_rows
        && written != records.len() as u64
    {
        warn!(
            table = %table,
            submitted = records.len(),
            written,
            "warehouse reported a different row count than submitted"
        );
    }
    info!(
        table = %table,
        rows = records.len(),
        write_mode = %write_mode,
        job_id = %job.job_id,
        "loaded records"
    );

    Ok(LoadOutcome::Loaded {
        rows: records.len(),
        job_id: job.job_id,
    })
}
