//! Shared fixtures: configuration pointing at mock servers, sample envelopes

use pbdb_ingest::{Config, Filters};
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::MockServer;

/// Project used by every mock warehouse
pub const PROJECT: &str = "dino-proj";

/// Configuration whose source and warehouse both point at mock servers
pub fn config_for(pbdb: &MockServer, bigquery: &MockServer) -> Config {
    let mut config = Config::default();
    config.source.base_url = pbdb.uri();
    config.warehouse.project_id = PROJECT.to_string();
    config.warehouse.api_base_url = bigquery.uri();
    config.warehouse.upload_base_url = format!("{}/upload", bigquery.uri());
    config.warehouse.token_uri = format!("{}/token", bigquery.uri());
    config.warehouse.metadata_url = bigquery.uri();
    config.warehouse.job_poll_interval = Duration::from_millis(10);
    config
}

/// Filters PBDB accepts for an occurrence listing
pub fn dinosaur_filters() -> Filters {
    Filters::new()
        .with("base_name", "Dinosauria")
        .and_then(|f| f.with("show", "coords"))
        .expect("valid filters")
}

/// A PBDB occurrence record in the compact vocabulary
pub fn occurrence(oid: u32, name: &str) -> Value {
    json!({
        "oid": format!("occ:{oid}"),
        "cid": "col:1",
        "tna": name,
        "rnk": 3,
        "eag": 72.1,
        "lag": 66.0,
        "lng": "-106.6",
        "lat": "46.9"
    })
}

/// Success envelope wrapping `records`
pub fn envelope(records: Vec<Value>) -> Value {
    json!({
        "elapsed_time": 0.01,
        "records": records
    })
}
