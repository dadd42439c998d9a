//! HTTP API tests for data sources, import jobs and the status stream
//!
//! ```bash
//! cargo test --test api_tests -- --ignored --nocapture
//! ```

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use common::{init_test_tracing, TestDataHelper, TestPostgres};
use http_body_util::BodyExt;
use registry_import::{
    api::{create_router, AppState},
    config::Config,
    notifications::Broker,
};
use serde_json::{json, Value};
use serial_test::serial;
use sqlx::PgPool;
use std::time::Duration;
use tower::ServiceExt;

fn app(pool: PgPool) -> Router {
    create_router(
        AppState {
            db: pool,
            broker: Broker::new(16, 3),
        },
        &Config::default(),
    )
}

fn json_request(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::COOKIE, format!("registry_token={token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_health_reports_database() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");

    let response = app(pg.pool_clone()).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["database"], "connected");
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_data_source_and_job_lifecycle() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let data = TestDataHelper::new(pg.pool());
    let user = data.create_user("operator").await.unwrap();
    data.create_token(user, "op-token").await.unwrap();
    let app = app(pg.pool_clone());

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/data-sources",
            None,
            json!({
                "name": "Stats bureau",
                "priority": "ok",
                "variables_mapping": [{"source": "id", "target": "StatId"}],
                "stat_unit_type": "local_unit"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let source_id = json_body(response).await["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(get("/api/v1/data-sources?page=1&per_page=10"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["meta"]["pagination"]["total"], 1);

    let create_job = json!({ "data_source_id": source_id, "slug": "bureau-2024" });
    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/api/v1/import-jobs", None, create_job.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/import-jobs",
            Some("op-token"),
            create_job.clone(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let job = json_body(response).await["data"].clone();
    assert_eq!(job["status"], "waiting_for_upload");
    let job_id = job["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/import-jobs",
            Some("op-token"),
            create_job,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(get(&format!("/api/v1/import-jobs/{job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["slug"], "bureau-2024");

    let response = app
        .clone()
        .oneshot(get(&format!("/api/v1/import-jobs/{job_id}/logs")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"], json!([]));

    let response = app.oneshot(get("/api/v1/import-jobs/999999")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_status_stream_sends_handshake_then_snapshot() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let data = TestDataHelper::new(pg.pool());
    let source = data.create_data_source("Tax office", "trusted").await.unwrap();
    let job_id = data
        .create_job(source, None, "tracked", "in_queue")
        .await
        .unwrap();

    let response = app(pg.pool_clone())
        .oneshot(get(&format!(
            "/api/v1/sse/import-jobs?ids={job_id},424242&scope=updates_for_ids_only"
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let mut body = response.into_body();
    let mut text = String::new();
    while !text.contains("event: import_job") {
        let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .expect("timed out waiting for stream data")
            .expect("stream ended")
            .unwrap();
        if let Ok(chunk) = frame.into_data() {
            text.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    let handshake = text.find("event: handshake").expect("handshake first");
    let snapshot = text.find("event: import_job").unwrap();
    assert!(handshake < snapshot);
    assert!(text.contains("retry: 3000"));
    assert!(text.contains("\"slug\":\"tracked\""));
    assert!(!text.contains("\"id\":424242"), "unknown ids produce no snapshot frame");
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_status_stream_rejects_bad_ids() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");

    let response = app(pg.pool_clone())
        .oneshot(get("/api/v1/sse/import-jobs?ids=1,abc"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
