//! BigQuery REST (v2) implementation of [`Warehouse`].

use super::auth::{Credentials, TokenProvider};
use super::{CreateOutcome, LoadJob, Warehouse};
use crate::config::WarehouseConfig;
use crate::error::{Error, LoadError, Result, body_snippet};
use crate::types::{DatasetHandle, Record, TableTarget, WriteMode};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};
use urlencoding::encode;

/// BigQuery client authenticated with resolved [`Credentials`]
///
/// The client is project-agnostic: every call addresses the project named by
/// its [`DatasetHandle`] or [`TableTarget`].
#[derive(Debug)]
pub struct BigQueryClient {
    http_client: reqwest::Client,
    tokens: TokenProvider,
    api_base_url: String,
    upload_base_url: String,
    job_poll_interval: Duration,
}

impl BigQueryClient {
    /// Create a client using already resolved credentials
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: &WarehouseConfig, credentials: Credentials) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("pbdb-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to create HTTP client: {e}"),
                key: None,
            })?;

        let tokens = TokenProvider::new(
            credentials,
            http_client.clone(),
            config.token_uri.clone(),
            config.metadata_url.clone(),
        );

        Ok(Self {
            http_client,
            tokens,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            upload_base_url: config.upload_base_url.trim_end_matches('/').to_string(),
            job_poll_interval: config.job_poll_interval,
        })
    }

    /// Credentials this client authenticates with
    pub fn credentials(&self) -> &Credentials {
        self.tokens.credentials()
    }

    fn dataset_url(&self, dataset: &DatasetHandle) -> String {
        format!(
            "{}/projects/{}/datasets/{}",
            self.api_base_url,
            encode(&dataset.project_id),
            encode(&dataset.dataset_id)
        )
    }

    async fn authorized(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let token = self.tokens.access_token().await?;
        Ok(request.bearer_auth(token))
    }

    /// Poll a job until BigQuery reports it `DONE`
    async fn wait_for_job(&self, table: &TableTarget, mut job: JobResource) -> Result<JobResource> {
        let project = &table.dataset.project_id;
        loop {
            if job.status.state == "DONE" {
                return Ok(job);
            }
            debug!(
                job_id = %job.job_reference.job_id,
                state = %job.status.state,
                "waiting for load job"
            );
            tokio::time::sleep(self.job_poll_interval).await;

            let location = job
                .job_reference
                .location
                .clone()
                .unwrap_or_else(|| table.dataset.location.clone());
            let url = format!(
                "{}/projects/{}/jobs/{}",
                self.api_base_url,
                encode(project),
                encode(&job.job_reference.job_id)
            );
            let request = self
                .authorized(self.http_client.get(url).query(&[("location", location)]))
                .await?;
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(warehouse_error("get_job", status, &body));
            }
            job = serde_json::from_str(&body)?;
        }
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn dataset_exists(&self, dataset: &DatasetHandle) -> Result<bool> {
        let request = self
            .authorized(self.http_client.get(self.dataset_url(dataset)))
            .await?;
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let body = response.text().await?;
        Err(warehouse_error("get_dataset", status, &body))
    }

    async fn create_dataset(
        &self,
        dataset: &DatasetHandle,
        description: &str,
    ) -> Result<CreateOutcome> {
        let url = format!(
            "{}/projects/{}/datasets",
            self.api_base_url,
            encode(&dataset.project_id)
        );
        let body = json!({
            "datasetReference": {
                "projectId": dataset.project_id,
                "datasetId": dataset.dataset_id,
            },
            "location": dataset.location,
            "description": description,
        });

        let request = self.authorized(self.http_client.post(url).json(&body)).await?;
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(CreateOutcome::Created);
        }
        if status == StatusCode::CONFLICT {
            return Ok(CreateOutcome::AlreadyExists);
        }
        let body = response.text().await?;
        Err(warehouse_error("create_dataset", status, &body))
    }

    async fn load_json(
        &self,
        table: &TableTarget,
        records: &[Record],
        write_mode: WriteMode,
    ) -> Result<LoadJob> {
        let metadata = load_job_config(table, write_mode);
        let data = to_ndjson(records)?;
        let boundary = multipart_boundary(&data, random_boundary);
        let payload = multipart_related(&boundary, &metadata, &data);

        let url = format!(
            "{}/projects/{}/jobs",
            self.upload_base_url,
            encode(&table.dataset.project_id)
        );
        let request = self
            .authorized(
                self.http_client
                    .post(url)
                    .query(&[("uploadType", "multipart")])
                    .header(
                        reqwest::header::CONTENT_TYPE,
                        format!("multipart/related; boundary={boundary}"),
                    )
                    .body(payload),
            )
            .await?;

        debug!(table = %table, rows = records.len(), bytes = data.len(), "submitting load job");
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LoadError::Rejected {
                table: table.to_string(),
                status: status.as_u16(),
                body_snippet: error_message(&body),
            }
            .into());
        }

        let job: JobResource = serde_json::from_str(&body)?;
        info!(table = %table, job_id = %job.job_reference.job_id, "load job submitted");
        let job = self.wait_for_job(table, job).await?;

        if let Some(error) = &job.status.error_result {
            let errors: Vec<String> = job.status.errors.iter().map(ErrorProto::describe).collect();
            for e in &errors {
                warn!(job_id = %job.job_reference.job_id, error = %e, "load job error");
            }
            return Err(LoadError::JobFailed {
                job_id: job.job_reference.job_id.clone(),
                table: table.to_string(),
                reason: error.describe(),
                errors,
            }
            .into());
        }

        Ok(LoadJob {
            output_rows: job
                .statistics
                .and_then(|s| s.load)
                .and_then(|l| l.output_rows)
                .and_then(|rows| rows.parse().ok()),
            job_id: job.job_reference.job_id,
        })
    }

    fn name(&self) -> &'static str {
        "bigquery"
    }
}

/// Load job configuration for newline-delimited JSON with schema autodetection
fn load_job_config(table: &TableTarget, write_mode: WriteMode) -> serde_json::Value {
    json!({
        "jobReference": {
            "projectId": table.dataset.project_id,
            "location": table.dataset.location,
        },
        "configuration": {
            "load": {
                "destinationTable": {
                    "projectId": table.dataset.project_id,
                    "datasetId": table.dataset.dataset_id,
                    "tableId": table.table_id,
                },
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "writeDisposition": write_mode.as_disposition(),
                "createDisposition": "CREATE_IF_NEEDED",
                "autodetect": true,
            }
        }
    })
}

fn to_ndjson(records: &[Record]) -> Result<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

fn random_boundary() -> String {
    format!("pbdb_ingest_{:032x}", rand::random::<u128>())
}

/// First candidate boundary that does not occur in the payload
fn multipart_boundary(data: &str, mut candidate: impl FnMut() -> String) -> String {
    loop {
        let boundary = candidate();
        if !data.contains(&boundary) {
            return boundary;
        }
    }
}

fn multipart_related(boundary: &str, metadata: &serde_json::Value, data: &str) -> String {
    format!(
        "--{boundary}\r\n\
         Content-Type: application/json; charset=UTF-8\r\n\r\n\
         {metadata}\r\n\
         --{boundary}\r\n\
         Content-Type: application/octet-stream\r\n\r\n\
         {data}\r\n\
         --{boundary}--\r\n"
    )
}

fn warehouse_error(operation: &str, status: StatusCode, body: &str) -> Error {
    Error::Warehouse {
        operation: operation.to_string(),
        status: status.as_u16(),
        message: error_message(body),
    }
}

/// Pull `error.message` out of a Google API error body, else a body snippet
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body_snippet(body))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    status: JobStatus,
    #[serde(default)]
    statistics: Option<JobStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorProto {
    fn describe(&self) -> String {
        match (&self.reason, &self.message) {
            (Some(reason), Some(message)) => format!("{reason}: {message}"),
            (None, Some(message)) => message.clone(),
            (Some(reason), None) => reason.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobStatistics {
    #[serde(default)]
    load: Option<LoadStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    // int64 values arrive as JSON strings
    #[serde(default)]
    output_rows: Option<String>,
}
