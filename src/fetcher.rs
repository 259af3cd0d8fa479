//! PBDB occurrence fetching.
//!
//! [`OccurrenceFetcher`] issues exactly one bounded request per call against
//! the PBDB occurrence listing and turns the response into a [`Page`]. It never
//! loops over pages itself; walking the corpus is done by the caller by moving
//! `offset` forward (see [`Pipeline::run_to_end`](crate::Pipeline::run_to_end)).

use crate::config::SourceConfig;
use crate::error::{Error, FetchError, Result, body_snippet};
use crate::types::{Filters, Page, QueryParams, Record};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Fetches pages of occurrence records from the PBDB API
#[derive(Clone, Debug)]
pub struct OccurrenceFetcher {
    /// HTTP client, reused across requests
    http_client: reqwest::Client,

    /// Full URL of the occurrence listing endpoint
    url: String,
}

impl OccurrenceFetcher {
    /// Create a fetcher for the configured PBDB endpoint
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build().map_err(|e| Error::Config {
            message: format!("failed to create HTTP client: {e}"),
            key: None,
        })?;

        Ok(Self {
            http_client,
            url: config.occurrence_url(),
        })
    }

    /// Endpoint this fetcher queries
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch one page of occurrence records
    ///
    /// An empty vector means the offset is past the end of the corpus.
    ///
    /// # Errors
    /// See [`fetch_page`](Self::fetch_page).
    pub async fn fetch(&self, limit: u32, offset: u64, filters: &Filters) -> Result<Vec<Record>> {
        Ok(self.fetch_page(limit, offset, filters).await?.records)
    }

    /// Fetch one page, keeping the API's warnings and row count
    ///
    /// # Errors
    /// Returns error if:
    /// - The request cannot be sent or the body cannot be read
    /// - The API answers with a non-success status ([`FetchError::Api`] when the
    ///   body carries an `errors` field, [`FetchError::Http`] otherwise)
    /// - A success body is not a JSON object with an array of objects under `records`
    pub async fn fetch_page(&self, limit: u32, offset: u64, filters: &Filters) -> Result<Page> {
        let params = QueryParams::new(limit, offset, filters);
        info!(url = %self.url, limit, offset, filters = filters.len(), "fetching occurrences");

        let response = self
            .http_client
            .get(&self.url)
            .query(&params.to_pairs())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(error_from_response(status.as_u16(), &body).into());
        }

        let page = parse_envelope(&body)?;
        for warning in &page.warnings {
            warn!(offset, warning = %warning, "PBDB API warning");
        }
        info!(
            offset,
            fetched = page.records.len(),
            records_found = page.records_found,
            "fetched occurrence records"
        );
        Ok(page)
    }
}

/// Build the fetch error for a non-success response
///
/// Warnings in the envelope are logged here; they never turn a failure into a
/// success, and they are kept on the error for the caller.
fn error_from_response(status: u16, body: &str) -> FetchError {
    let envelope = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map,
        _ => {
            debug!(status, "PBDB error response is not a JSON object");
            return FetchError::Http {
                status,
                body_snippet: body_snippet(body),
            };
        }
    };

    let warnings = envelope.get("warnings").map(messages).unwrap_or_default();
    for warning in &warnings {
        warn!(status, warning = %warning, "PBDB API warning");
    }

    match envelope.get("errors").map(messages) {
        Some(errors) if !errors.is_empty() => FetchError::Api {
            status,
            errors,
            warnings,
        },
        _ => FetchError::Http {
            status,
            body_snippet: body_snippet(body),
        },
    }
}

/// Parse a success envelope into a page
fn parse_envelope(body: &str) -> std::result::Result<Page, FetchError> {
    let envelope = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Err(FetchError::MalformedEnvelope {
                reason: format!("expected a JSON object, got {}", json_kind(&other)),
            });
        }
        Err(e) => {
            return Err(FetchError::MalformedEnvelope {
                reason: format!("invalid JSON ({e}): {}", body_snippet(body)),
            });
        }
    };

    let records = match envelope.get("records") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| match item {
                Value::Object(record) => Ok(record.clone()),
                other => Err(FetchError::MalformedEnvelope {
                    reason: format!("record {idx} is {}, not an object", json_kind(other)),
                }),
            })
            .collect::<std::result::Result<Vec<_>, _>>()?,
        Some(other) => {
            return Err(FetchError::MalformedEnvelope {
                reason: format!("'records' is {}, not an array", json_kind(other)),
            });
        }
    };

    let warnings = envelope.get("warnings").map(messages).unwrap_or_default();
    let records_found = envelope.get("records_found").and_then(as_count);

    Ok(Page {
        records,
        warnings,
        records_found,
    })
}

/// Flatten an `errors`/`warnings` field into display strings
///
/// PBDB sends arrays of strings, but a bare string or arbitrary JSON is
/// accepted so no diagnostic is lost.
fn messages(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().flat_map(messages).collect(),
        Value::String(s) => vec![s.clone()],
        other => vec![other.to_string()],
    }
}

/// `records_found` arrives as a number or a numeric string depending on format
fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn fetcher_for(server: &MockServer) -> OccurrenceFetcher {
        let config = SourceConfig {
            base_url: server.uri(),
            ..Default::default()
        };
        OccurrenceFetcher::new(&config).unwrap()
    }

    fn dino_filters() -> Filters {
        Filters::new().with("base_name", "Dinosauria").unwrap()
    }

    #[tokio::test]
    async fn sends_pagination_and_filters_as_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/occs/list.json"))
            .and(query_param("limit", "50"))
            .and(query_param("offset", "100"))
            .and(query_param("base_name", "Dinosauria"))
            .and(query_param("rowcount", "true"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"records_found": "1234", "records": [{"oid": "occ:1"}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher_for(&server).await;
        let filters = dino_filters().with("rowcount", true).unwrap();
        let page = fetcher.fetch_page(50, 100, &filters).await.unwrap();

        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0]["oid"], "occ:1");
        assert_eq!(page.records_found, Some(1234));
    }

    #[tokio::test]
    async fn empty_envelope_yields_no_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/occs/list.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let records = fetcher_for(&server)
            .await
            .fetch(10, 0, &dino_filters())
            .await
            .unwrap();

        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn api_errors_are_embedded_in_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({
                    "warnings": ["parameter 'foo' ignored"],
                    "errors": ["bad offset"]
                })),
            )
            .mount(&server)
            .await;

        let err = fetcher_for(&server)
            .await
            .fetch(10, 0, &dino_filters())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("bad offset"), "got: {err}");
        match err {
            Error::Fetch(FetchError::Api {
                status,
                errors,
                warnings,
            }) => {
                assert_eq!(status, 400);
                assert_eq!(errors, vec!["bad offset".to_string()]);
                assert_eq!(warnings, vec!["parameter 'foo' ignored".to_string()]);
            }
            other => panic!("expected FetchError::Api, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_error_body_is_embedded_as_snippet() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&server)
            .await;

        let err = fetcher_for(&server)
            .await
            .fetch(10, 0, &dino_filters())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("internal error"), "got: {err}");
        assert_eq!(err.error_code(), "fetch_http_error");
    }

    #[tokio::test]
    async fn long_error_body_is_truncated() {
        let server = MockServer::start().await;
        let body = format!("internal error {}", "x".repeat(2000));
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string(body))
            .mount(&server)
            .await;

        let err = fetcher_for(&server)
            .await
            .fetch(10, 0, &dino_filters())
            .await
            .unwrap_err();

        match err {
            Error::Fetch(FetchError::Http {
                status,
                body_snippet,
            }) => {
                assert_eq!(status, 502);
                assert!(body_snippet.starts_with("internal error"));
                assert_eq!(body_snippet.chars().count(), crate::error::BODY_SNIPPET_LIMIT);
            }
            other => panic!("expected FetchError::Http, got {other:?}"),
        }
    }

    #[test]
    fn json_error_without_errors_field_falls_back_to_snippet() {
        let err = error_from_response(404, r#"{"warnings":["no such endpoint"]}"#);
        match err {
            FetchError::Http { status, body_snippet } => {
                assert_eq!(status, 404);
                assert!(body_snippet.contains("no such endpoint"));
            }
            other => panic!("expected FetchError::Http, got {other:?}"),
        }
    }

    #[test]
    fn single_string_errors_field_is_accepted() {
        match error_from_response(400, r#"{"errors":"The parameter 'offset' is invalid"}"#) {
            FetchError::Api { errors, .. } => {
                assert_eq!(errors, vec!["The parameter 'offset' is invalid".to_string()])
            }
            other => panic!("expected FetchError::Api, got {other:?}"),
        }
    }

    #[test]
    fn success_warnings_are_kept_on_page() {
        let page = parse_envelope(
            r#"{"warnings":["unknown taxon 'Foo'"],"records":[{"oid":"occ:7"},{"oid":"occ:8"}]}"#,
        )
        .unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.warnings, vec!["unknown taxon 'Foo'".to_string()]);
        assert_eq!(page.records_found, None);
    }

    #[test]
    fn non_array_records_is_malformed() {
        let err = parse_envelope(r#"{"records":{"oid":"occ:1"}}"#).unwrap_err();
        assert!(matches!(err, FetchError::MalformedEnvelope { .. }));
        assert!(err.to_string().contains("not an array"));
    }

    #[test]
    fn non_object_record_is_malformed() {
        let err = parse_envelope(r#"{"records":[{"oid":"occ:1"}, 5]}"#).unwrap_err();
        assert!(err.to_string().contains("record 1"));
    }

    #[test]
    fn non_json_success_body_is_malformed() {
        let err = parse_envelope("<html>maintenance</html>").unwrap_err();
        assert!(err.to_string().contains("maintenance"));
    }

    #[test]
    fn null_records_is_empty() {
        let page = parse_envelope(r#"{"records":null}"#).unwrap();
        assert!(page.records.is_empty());
    }
}
