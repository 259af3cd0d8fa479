//! Configuration types for pbdb-ingest

use crate::error::{Error, Result};
use crate::types::DatasetHandle;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Project used when neither the caller, the environment, nor a key file names one
pub const DEFAULT_PROJECT_ID: &str = "Dinobase-Project";

/// Dataset holding raw PBDB tables
pub const DEFAULT_DATASET_ID: &str = "pbdb_raw";

/// Storage location for newly created datasets
pub const DEFAULT_LOCATION: &str = "US";

/// Description attached to newly created datasets
pub const DEFAULT_DATASET_DESCRIPTION: &str = "Raw, minimally transformed PBDB data";

/// Environment variable naming the GCP project
pub const PROJECT_ENV: &str = "GCP_PROJECT_ID";

/// Environment variable naming a credentials key file
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Environment variable overriding the PBDB API base URL
pub const API_BASE_ENV: &str = "PBDB_API_BASE";

/// PBDB API source configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// API base URL (default: "https://paleobiodb.org/data1.2")
    #[serde(default = "default_api_base")]
    pub base_url: String,

    /// Path of the occurrence listing relative to `base_url`
    #[serde(default = "default_occurrence_path")]
    pub occurrence_path: String,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (None = wait indefinitely)
    #[serde(default, with = "optional_duration_serde")]
    pub request_timeout: Option<Duration>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base(),
            occurrence_path: default_occurrence_path(),
            user_agent: default_user_agent(),
            request_timeout: None,
        }
    }
}

impl SourceConfig {
    /// Full URL of the occurrence listing endpoint
    pub fn occurrence_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.occurrence_path.trim_start_matches('/')
        )
    }
}

/// BigQuery warehouse configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// GCP project identifier (default: "Dinobase-Project")
    ///
    /// A project embedded in the credentials key file replaces this value
    /// only while it is still the library default.
    #[serde(default = "default_project_id")]
    pub project_id: String,

    /// Dataset name (default: "pbdb_raw")
    #[serde(default = "default_dataset_id")]
    pub dataset_id: String,

    /// Dataset storage location (default: "US")
    #[serde(default = "default_location")]
    pub location: String,

    /// Description attached when the dataset is created
    #[serde(default = "default_dataset_description")]
    pub description: String,

    /// Path to a credentials key file (None = use ambient credentials)
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,

    /// BigQuery REST base URL
    #[serde(default = "default_bigquery_api")]
    pub api_base_url: String,

    /// BigQuery media upload base URL
    #[serde(default = "default_bigquery_upload")]
    pub upload_base_url: String,

    /// OAuth token endpoint used for refresh-token credentials
    #[serde(default = "default_token_uri")]
    pub token_uri: String,

    /// GCE metadata server base URL used for ambient credentials
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,

    /// Delay between load job status polls (default: 1 second)
    #[serde(default = "default_job_poll_interval", with = "duration_serde")]
    pub job_poll_interval: Duration,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project_id: default_project_id(),
            dataset_id: default_dataset_id(),
            location: default_location(),
            description: default_dataset_description(),
            credentials_path: None,
            api_base_url: default_bigquery_api(),
            upload_base_url: default_bigquery_upload(),
            token_uri: default_token_uri(),
            metadata_url: default_metadata_url(),
            job_poll_interval: default_job_poll_interval(),
        }
    }
}

impl WarehouseConfig {
    /// Dataset handle described by this configuration
    pub fn dataset_handle(&self) -> DatasetHandle {
        DatasetHandle::new(&self.project_id, &self.dataset_id, &self.location)
    }

    /// Apply a project identifier found in a credentials key file
    ///
    /// The key file wins only if the configured project was left at the
    /// library default; a deliberately chosen project is kept.
    pub fn adopt_key_file_project(&mut self, key_file_project: Option<&str>) {
        if let Some(project) = key_file_project.filter(|p| !p.is_empty())
            && self.project_id == DEFAULT_PROJECT_ID
        {
            tracing::debug!(project, "using project from credentials key file");
            self.project_id = project.to_string();
        }
    }
}

/// Main configuration for the ingest pipeline
///
/// - [`source`](SourceConfig) — where records come from
/// - [`warehouse`](WarehouseConfig) — where records go
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// PBDB API settings
    #[serde(default)]
    pub source: SourceConfig,

    /// BigQuery settings
    #[serde(default)]
    pub warehouse: WarehouseConfig,
}

impl Config {
    /// Build a configuration from defaults overlaid with environment variables
    ///
    /// Reads `GCP_PROJECT_ID`, `GOOGLE_APPLICATION_CREDENTIALS`, and
    /// `PBDB_API_BASE` when set and non-empty.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Some(project) = env_var(PROJECT_ENV) {
            config.warehouse.project_id = project;
        }
        if let Some(path) = env_var(CREDENTIALS_ENV) {
            config.warehouse.credentials_path = Some(PathBuf::from(path));
        }
        if let Some(base) = env_var(API_BASE_ENV) {
            config.source.base_url = base;
        }
        config
    }

    /// Check that every setting required to run the pipeline is present
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("source.base_url", &self.source.base_url),
            ("warehouse.project_id", &self.warehouse.project_id),
            ("warehouse.dataset_id", &self.warehouse.dataset_id),
            ("warehouse.location", &self.warehouse.location),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(Error::config(format!("{key} must not be empty"), key));
            }
        }

        if !is_valid_dataset_id(&self.warehouse.dataset_id) {
            return Err(Error::config(
                format!(
                    "invalid dataset id '{}': only letters, digits, and underscores are allowed",
                    self.warehouse.dataset_id
                ),
                "warehouse.dataset_id",
            ));
        }

        if self.warehouse.job_poll_interval.is_zero() {
            return Err(Error::config(
                "job_poll_interval must be greater than zero",
                "warehouse.job_poll_interval",
            ));
        }

        Ok(())
    }
}

fn is_valid_dataset_id(id: &str) -> bool {
    id.len() <= 1024 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn default_api_base() -> String {
    "https://paleobiodb.org/data1.2".to_string()
}

fn default_occurrence_path() -> String {
    "occs/list.json".to_string()
}

fn default_user_agent() -> String {
    format!("pbdb-ingest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_project_id() -> String {
    DEFAULT_PROJECT_ID.to_string()
}

fn default_dataset_id() -> String {
    DEFAULT_DATASET_ID.to_string()
}

fn default_location() -> String {
    DEFAULT_LOCATION.to_string()
}

fn default_dataset_description() -> String {
    DEFAULT_DATASET_DESCRIPTION.to_string()
}

fn default_bigquery_api() -> String {
    "https://bigquery.googleapis.com/bigquery/v2".to_string()
}

fn default_bigquery_upload() -> String {
    "https://bigquery.googleapis.com/upload/bigquery/v2".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_metadata_url() -> String {
    "http://metadata.google.internal/computeMetadata/v1".to_string()
}

fn default_job_poll_interval() -> Duration {
    Duration::from_secs(1)
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}
