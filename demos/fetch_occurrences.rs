//! Fetch-and-load example
//!
//! This example demonstrates the core functionality of pbdb-ingest:
//! - Building configuration from the environment (and an optional `.env` file)
//! - Provisioning the `pbdb_raw` dataset on first use
//! - Loading one page of occurrences into the `occurrences` table
//! - Optionally walking the remaining pages
//!
//! Environment:
//! - `GCP_PROJECT_ID`, `GOOGLE_APPLICATION_CREDENTIALS` - warehouse target and credentials
//! - `PBDB_BASE_NAME` - taxon to fetch (default: "Dinosauria")
//! - `PBDB_WALK_PAGES` - if set, number of pages to walk instead of a single run
//! - `RUST_LOG` - log filter (default: "info")

use pbdb_ingest::{Config, Filters, Pipeline, RunRequest, WriteMode};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let base_name = std::env::var("PBDB_BASE_NAME").unwrap_or_else(|_| "Dinosauria".to_string());
    let filters = Filters::new()
        .with("base_name", base_name)?
        .with("show", "coords,class")?;

    let pipeline = Pipeline::connect(Config::from_env()).await?;
    let request = RunRequest::new("occurrences", filters)
        .limit(1000)
        .offset(0)
        .write_mode(WriteMode::Append);

    match std::env::var("PBDB_WALK_PAGES").ok().and_then(|p| p.parse().ok()) {
        Some(max_pages) => {
            let summary = pipeline.run_to_end(&request, Some(max_pages)).await?;
            tracing::info!(
                pages = summary.pages,
                rows = summary.rows_loaded,
                next_offset = summary.next_offset,
                "walk completed"
            );
        }
        None => {
            let summary = pipeline.run_once(&request).await?;
            tracing::info!(
                table = %summary.table,
                rows = summary.load.rows(),
                "data fetch and load completed"
            );
        }
    }

    Ok(())
}
