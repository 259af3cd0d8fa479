//! Dataset provisioning

use crate::error::{Error, Result};
use crate::types::DatasetHandle;
use crate::warehouse::{CreateOutcome, Warehouse};
use tracing::{error, info};

/// Make sure `dataset` exists, creating it if absent
///
/// Safe to call on every start: an existing dataset is left untouched, and a
/// create that races with another process ("already exists") counts as
/// success. At most one create request is issued per call.
///
/// # Errors
///
/// Returns [`Error::Config`] if the dataset cannot be looked up or created
/// (permission denied, unknown project, invalid name). Not retried.
pub async fn ensure_dataset(
    warehouse: &dyn Warehouse,
    dataset: &DatasetHandle,
    description: &str,
) -> Result<()> {
    let exists = warehouse
        .dataset_exists(dataset)
        .await
        .map_err(|e| provisioning_error(dataset, "look up", e))?;

    if exists {
        info!(dataset = %dataset, "dataset already exists");
        return Ok(());
    }

    match warehouse.create_dataset(dataset, description).await {
        Ok(CreateOutcome::Created) => {
            info!(dataset = %dataset, location = %dataset.location, "created dataset");
            Ok(())
        }
        Ok(CreateOutcome::AlreadyExists) => {
            info!(dataset = %dataset, "dataset created concurrently by another caller");
            Ok(())
        }
        Err(e) => Err(provisioning_error(dataset, "create", e)),
    }
}

fn provisioning_error(dataset: &DatasetHandle, action: &str, cause: Error) -> Error {
    error!(dataset = %dataset, error = %cause, "failed to {action} dataset");
    Error::Config {
        message: format!("failed to {action} dataset {dataset}: {cause}"),
        key: Some("dataset_id".to_string()),
    }
}
