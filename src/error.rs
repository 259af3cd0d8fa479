//! Error types for pbdb-ingest
//!
//! This module provides the closed set of failures the pipeline can raise:
//! - Configuration errors (credentials, project, dataset provisioning, filters)
//! - Fetch errors from the PBDB API, carrying the API-reported diagnostics
//! - Load errors from BigQuery load jobs
//! - Transport-level errors (network, serialization, I/O)

use thiserror::Error;

/// Result type alias for pbdb-ingest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum number of characters of a raw response body embedded in an error
pub const BODY_SNIPPET_LIMIT: usize = 500;

/// Main error type for pbdb-ingest
///
/// Every fatal condition raised by the provisioner, fetcher, loader, or
/// pipeline is one of these variants. Each variant carries enough context to
/// diagnose the failure without re-running with verbose tracing.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "dataset_id")
        key: Option<String>,
    },

    /// PBDB API request failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// BigQuery load job failed or was rejected
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    /// A BigQuery control call (dataset lookup, job poll) failed
    #[error("warehouse error during {operation}: HTTP {status}: {message}")]
    Warehouse {
        /// The operation that failed (e.g., "get_dataset", "get_job")
        operation: String,
        /// HTTP status returned by the warehouse API
        status: u16,
        /// Error message reported by the warehouse, or a body snippet
        message: String,
    },

    /// Access token could not be obtained
    #[error("authentication error: {0}")]
    Auth(String),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the PBDB occurrence fetcher
#[derive(Debug, Error)]
pub enum FetchError {
    /// The API answered with a non-success status and a JSON error envelope
    #[error("PBDB API returned HTTP {status}: {}", .errors.join("; "))]
    Api {
        /// HTTP status code
        status: u16,
        /// Entries of the envelope's `errors` field
        errors: Vec<String>,
        /// Entries of the envelope's `warnings` field (non-fatal on their own)
        warnings: Vec<String>,
    },

    /// The API answered with a non-success status and no usable error envelope
    #[error("PBDB API returned HTTP {status}: {body_snippet}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Leading characters of the raw response body
        body_snippet: String,
    },

    /// A success response whose envelope could not be interpreted
    #[error("malformed PBDB response envelope: {reason}")]
    MalformedEnvelope {
        /// What was wrong with the envelope
        reason: String,
    },
}

/// Errors raised while loading a batch into BigQuery
#[derive(Debug, Error)]
pub enum LoadError {
    /// The load job reached its terminal state with an error result
    #[error("load job {job_id} into {table} failed: {reason}")]
    JobFailed {
        /// BigQuery job identifier
        job_id: String,
        /// Fully qualified destination table (`project.dataset.table`)
        table: String,
        /// Primary error message from the job's `errorResult`
        reason: String,
        /// Every error message the job reported
        errors: Vec<String>,
    },

    /// The load job could not be submitted
    #[error("load job for {table} rejected with HTTP {status}: {body_snippet}")]
    Rejected {
        /// Fully qualified destination table (`project.dataset.table`)
        table: String,
        /// HTTP status returned by the upload endpoint
        status: u16,
        /// Error message reported by the warehouse, or a body snippet
        body_snippet: String,
    },
}

impl Error {
    /// Create a configuration error tied to a specific setting
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Get the machine-readable error code
    pub fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Fetch(e) => match e {
                FetchError::Api { .. } => "fetch_api_error",
                FetchError::Http { .. } => "fetch_http_error",
                FetchError::MalformedEnvelope { .. } => "malformed_envelope",
            },
            Error::Load(e) => match e {
                LoadError::JobFailed { .. } => "load_job_failed",
                LoadError::Rejected { .. } => "load_rejected",
            },
            Error::Warehouse { .. } => "warehouse_error",
            Error::Auth(_) => "auth_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Io(_) => "io_error",
        }
    }
}

/// Truncate a response body to at most [`BODY_SNIPPET_LIMIT`] characters
///
/// Truncation happens on character boundaries, so multi-byte text never
/// produces an invalid string.
pub fn body_snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_SNIPPET_LIMIT) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}
