//! Mock BigQuery endpoints mounted on a wiremock server

use super::fixtures::PROJECT;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Dataset lookups answer 404 and creation succeeds, each expected `creates` times
pub async fn mount_missing_dataset(server: &MockServer, lookups: u64, creates: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/projects/{PROJECT}/datasets/pbdb_raw")))
        .respond_with(ResponseTemplate::new(404))
        .expect(lookups)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}/datasets")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": format!("{PROJECT}:pbdb_raw")
        })))
        .expect(creates)
        .mount(server)
        .await;
}

/// Dataset lookups answer 200 and no create is expected
pub async fn mount_existing_dataset(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("/projects/{PROJECT}/datasets/pbdb_raw")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": format!("{PROJECT}:pbdb_raw"),
            "location": "US"
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}/datasets")))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(server)
        .await;
}

/// Load jobs carrying `disposition` finish immediately; expected `times` times
pub async fn mount_load_job(server: &MockServer, disposition: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path(format!("/upload/projects/{PROJECT}/jobs")))
        .and(body_string_contains(format!(
            r#""writeDisposition":"{disposition}""#
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobReference": {"projectId": PROJECT, "jobId": "job_ok", "location": "US"},
            "status": {"state": "DONE"},
            "statistics": {"load": {"outputRows": "2"}}
        })))
        .expect(times)
        .mount(server)
        .await;
}

/// Any load job finishes with the given error result
pub async fn mount_failing_load_job(server: &MockServer, message: &str) {
    Mock::given(method("POST"))
        .and(path_regex(r"^/upload/projects/[^/]+/jobs$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobReference": {"projectId": PROJECT, "jobId": "job_bad", "location": "US"},
            "status": {
                "state": "DONE",
                "errorResult": {"reason": "invalid", "message": message},
                "errors": [{"reason": "invalid", "message": message}]
            }
        })))
        .mount(server)
        .await;
}

/// Count load job submissions received so far
pub async fn load_submissions(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path().starts_with("/upload/"))
        .map(|r| String::from_utf8_lossy(&r.body).into_owned())
        .collect()
}

/// OAuth token endpoint exchanging any refresh token for `ya29.mock`
pub async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.mock",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

/// Write an `authorized_user` key file, optionally naming a project
pub fn authorized_user_key_file(project: Option<&str>) -> tempfile::NamedTempFile {
    use std::io::Write;

    let mut key = json!({
        "type": "authorized_user",
        "client_id": "client-id.apps.googleusercontent.com",
        "client_secret": "client-secret",
        "refresh_token": "1//refresh"
    });
    if let Some(project) = project {
        key["quota_project_id"] = json!(project);
    }
    let mut file = tempfile::NamedTempFile::new().expect("create key file");
    write!(file, "{key}").expect("write key file");
    file
}
