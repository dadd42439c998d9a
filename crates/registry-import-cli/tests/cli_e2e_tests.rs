//! End-to-end tests for the regimport binary
//!
//! The binary runs against a mock server; these check argument handling,
//! the upload request shape and user-facing output.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use std::fs;
use tempfile::TempDir;
use wiremock::{
    matchers::{header, method, path},
    Match, Mock, MockServer, Request, ResponseTemplate,
};

const CSV: &str = "id,name\n1001,Alpha LLC\n1002,Beta LLC\n1003,Gamma LLC\n";

/// The `jobSlug` field must precede the file part
struct SlugBeforeFile;

impl Match for SlugBeforeFile {
    fn matches(&self, request: &Request) -> bool {
        let body = String::from_utf8_lossy(&request.body);
        match (body.find("name=\"jobSlug\""), body.find("name=\"file\"")) {
            (Some(slug), Some(file)) => slug < file && body.contains("units-2024"),
            _ => false,
        }
    }
}

fn write_csv(dir: &TempDir) -> std::path::PathBuf {
    let file = dir.path().join("units.csv");
    fs::write(&file, CSV).expect("Failed to write test file");
    file
}

fn regimport(server: &MockServer) -> Command {
    let mut cmd = Command::cargo_bin("regimport").unwrap();
    cmd.env_remove("REGISTRY_TOKEN")
        .env_remove("REGISTRY_SERVER_URL")
        .arg("--server-url")
        .arg(server.uri());
    cmd
}

#[tokio::test]
async fn test_upload_sends_slug_then_file() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let file = write_csv(&dir);

    Mock::given(method("POST"))
        .and(path("/api/v1/import/upload"))
        .and(header("authorization", "Bearer op-token"))
        .and(SlugBeforeFile)
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "job_id": 17,
                "slug": "units-2024",
                "rows_staged": 3,
                "columns": ["id", "name"]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    regimport(&server)
        .arg("--token")
        .arg("op-token")
        .arg("upload")
        .arg("--job")
        .arg("units-2024")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Staged 3 row(s)"))
        .stdout(predicate::str::contains("regimport watch --ids 17"));
}

#[tokio::test]
async fn test_upload_without_token_fails_before_sending() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let file = write_csv(&dir);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    regimport(&server)
        .arg("upload")
        .arg("--job")
        .arg("units-2024")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No API token"));
}

#[tokio::test]
async fn test_upload_reports_server_rejection() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let file = write_csv(&dir);

    Mock::given(method("POST"))
        .and(path("/api/v1/import/upload"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "success": false,
            "error": {
                "code": "CONFLICT",
                "message": "Import job 'units-2024' is in_queue, expected waiting_for_upload"
            }
        })))
        .mount(&server)
        .await;

    regimport(&server)
        .env("REGISTRY_TOKEN", "op-token")
        .arg("upload")
        .arg("--job")
        .arg("units-2024")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("409"))
        .stderr(predicate::str::contains("CONFLICT"));
}

#[tokio::test]
async fn test_upload_missing_file() {
    let server = MockServer::start().await;

    regimport(&server)
        .arg("--token")
        .arg("op-token")
        .arg("upload")
        .arg("--job")
        .arg("units-2024")
        .arg("does-not-exist.csv")
        .assert()
        .failure()
        .stderr(predicate::str::contains("File not found"));
}

#[tokio::test]
async fn test_watch_until_done() {
    let server = MockServer::start().await;
    let handshake = json!({
        "server_time": "2024-05-01T10:00:00Z",
        "connection_id": 3,
        "scope": "updates_for_ids_only",
        "ids": [5],
    });
    let done = json!({
        "channel": "import_job",
        "verb": "Update",
        "id": 5,
        "entity": { "id": 5, "status": "data_load_completed", "rows_processed": 3, "rows_failed": 0 },
        "timestamp": "2024-05-01T10:00:02Z",
    });
    let body = format!(
        "retry: 3000\nevent: handshake\ndata: {handshake}\n\nevent: import_job\ndata: {done}\n\n"
    );

    Mock::given(method("GET"))
        .and(path("/api/v1/sse/import-jobs"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    regimport(&server)
        .arg("watch")
        .arg("--ids")
        .arg("5")
        .arg("--until-done")
        .assert()
        .success()
        .stdout(predicate::str::contains("connection 3"))
        .stdout(predicate::str::contains("data_load_completed"))
        .stdout(predicate::str::contains("All tracked jobs finished"));
}

#[test]
fn test_watch_rejects_bad_ids() {
    Command::cargo_bin("regimport")
        .unwrap()
        .arg("--server-url")
        .arg("http://127.0.0.1:9")
        .arg("watch")
        .arg("--ids")
        .arg("1,abc")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid id list"));
}
