//! Upload gateway and end-to-end import tests
//!
//! Requests go through the full router with `tower::ServiceExt::oneshot`;
//! the database is a PostgreSQL container.
//!
//! ```bash
//! cargo test --test upload_tests -- --ignored --nocapture
//! ```

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use common::{
    init_test_tracing, multipart_body, TestDataHelper, TestPostgres, MULTIPART_BOUNDARY,
    UNITS_HEADER,
};
use registry_common::types::{ImportJobStatus, SubscriptionScope};
use registry_import::{
    api::{create_router, AppState},
    config::Config,
    ingest::{analyzer::AnalysisConfig, store::PgUnitStore, QueueService, RowProcessor},
    notifications::{Broker, ChangeListener, Filter, Outbound},
};
use serde_json::Value;
use serial_test::serial;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const TOKEN: &str = "s3cret-upload-token";
const CSV: &[u8] = b"id,name,street,city,activity,activity_type
1001,Alpha LLC,Main st 1,Bishkek,62.01,primary
1002,Beta LLC,Chui ave 20,Bishkek,47.11,primary
1003,\"Gamma, Delta LLC\",Lenin st 5,Osh,01.11,primary
";

fn app(pool: PgPool) -> Router {
    create_router(
        AppState {
            db: pool,
            broker: Broker::new(16, 3),
        },
        &Config::default(),
    )
}

fn upload_request(token: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/import/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        )
        .header(header::CONTENT_LENGTH, body.len());
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Owner with a token, a trusted legal unit source and one job awaiting upload
async fn seed(pg: &TestPostgres, slug: &str) -> i64 {
    let data = TestDataHelper::new(pg.pool());
    let user = data.create_user("uploader").await.unwrap();
    data.create_token(user, TOKEN).await.unwrap();
    let source = data.create_data_source("Tax office", "trusted").await.unwrap();
    data.create_job(source, Some(user), slug, "waiting_for_upload")
        .await
        .unwrap()
}

async fn wait_for_status(data: &TestDataHelper<'_>, job_id: i64, expected: &str) {
    for _ in 0..50 {
        if data.job_status(job_id).await.unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {job_id} never reached {expected}");
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_upload_requires_credentials() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    seed(&pg, "units-2024").await;
    let app = app(pg.pool_clone());

    let response = app
        .clone()
        .oneshot(upload_request(None, multipart_body(Some("units-2024"), "u.csv", CSV)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(upload_request(
            Some("not-a-token"),
            multipart_body(Some("units-2024"), "u.csv", CSV),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_revoked_token_and_foreign_job_are_forbidden() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    seed(&pg, "units-2024").await;
    let data = TestDataHelper::new(pg.pool());
    let other = data.create_user("someone-else").await.unwrap();
    data.create_token(other, "other-token").await.unwrap();
    let app = app(pg.pool_clone());

    let response = app
        .clone()
        .oneshot(upload_request(
            Some("other-token"),
            multipart_body(Some("units-2024"), "u.csv", CSV),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    data.revoke_token(TOKEN).await.unwrap();
    let response = app
        .oneshot(upload_request(
            Some(TOKEN),
            multipart_body(Some("units-2024"), "u.csv", CSV),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_unknown_slug_missing_fields_and_wrong_state() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let job_id = seed(&pg, "units-2024").await;
    let app = app(pg.pool_clone());

    let response = app
        .clone()
        .oneshot(upload_request(Some(TOKEN), multipart_body(Some("nope"), "u.csv", CSV)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(upload_request(Some(TOKEN), multipart_body(None, "u.csv", CSV)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"]["message"].as_str().unwrap().contains("jobSlug"));

    sqlx::query("UPDATE import_jobs SET status = 'in_queue' WHERE id = $1")
        .bind(job_id)
        .execute(pg.pool())
        .await
        .unwrap();
    let response = app
        .oneshot(upload_request(Some(TOKEN), multipart_body(Some("units-2024"), "u.csv", CSV)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_file_without_newline_is_rejected_and_job_released() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let job_id = seed(&pg, "units-2024").await;
    let app = app(pg.pool_clone());

    let content = vec![b'x'; 20 * 1024];
    let response = app
        .oneshot(upload_request(
            Some(TOKEN),
            multipart_body(Some("units-2024"), "blob.csv", &content),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let data = TestDataHelper::new(pg.pool());
    wait_for_status(&data, job_id, "waiting_for_upload").await;
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_upload_stages_rows_and_queues_job() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let job_id = seed(&pg, "units-2024").await;

    let response = app(pg.pool_clone())
        .oneshot(upload_request(
            Some(TOKEN),
            multipart_body(Some("units-2024"), "units.csv", CSV),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["job_id"], job_id);
    assert_eq!(body["data"]["slug"], "units-2024");
    assert_eq!(body["data"]["rows_staged"], 3);

    let queue = QueueService::new(pg.pool_clone());
    let job = queue.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, ImportJobStatus::InQueue);
    assert_eq!(job.upload_completed_pct, 100);
    assert_eq!(job.file_name.as_deref(), Some("units.csv"));
    assert_eq!(job.upload_table_name.as_deref(), Some(format!("import_upload_{job_id}").as_str()));
    assert_eq!(
        job.upload_columns,
        Some(UNITS_HEADER.iter().map(|c| c.to_string()).collect())
    );

    let names: Vec<String> = sqlx::query_scalar(&format!(
        "SELECT name FROM import_upload_{job_id} ORDER BY _row_id"
    ))
    .fetch_all(pg.pool())
    .await
    .unwrap();
    assert_eq!(names, vec!["Alpha LLC", "Beta LLC", "Gamma, Delta LLC"]);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_end_to_end_trusted_import() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let job_id = seed(&pg, "units-2024").await;

    let response = app(pg.pool_clone())
        .oneshot(upload_request(
            Some(TOKEN),
            multipart_body(Some("units-2024"), "units.csv", CSV),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let config = Config::default();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let broker = Broker::new(64, 3);
    let mut subscription =
        broker.subscribe(Filter::new(SubscriptionScope::UpdatesForIdsOnly, [job_id]));
    let listener = ChangeListener::new(
        pg.pool_clone(),
        broker.clone(),
        config.notifications.clone(),
        shutdown_rx,
    )
    .start();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let queue = QueueService::new(pg.pool_clone());
    let processor = RowProcessor::new(
        Arc::new(queue.clone()),
        Arc::new(PgUnitStore::new(pg.pool_clone())),
        AnalysisConfig::default(),
    );
    let job = queue.dequeue().await.unwrap().expect("job should be queued");
    let status = processor.process(&job).await.unwrap();
    assert_eq!(status, ImportJobStatus::DataLoadCompleted);

    let statuses: Vec<String> = sqlx::query_scalar(
        "SELECT status FROM upload_logs WHERE import_job_id = $1 ORDER BY id",
    )
    .bind(job_id)
    .fetch_all(pg.pool())
    .await
    .unwrap();
    assert_eq!(statuses, vec!["done", "done", "done"]);

    let units: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM statistical_units WHERE unit_type = 'legal_unit'",
    )
    .fetch_one(pg.pool())
    .await
    .unwrap();
    assert_eq!(units, 3);

    let staging_left: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
        .bind(format!("import_upload_{job_id}"))
        .fetch_one(pg.pool())
        .await
        .unwrap();
    assert!(!staging_left, "staging table should be dropped");

    let mut row_updates = Vec::new();
    let terminal = loop {
        let message = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
            .await
            .expect("timed out waiting for job events")
            .expect("broker closed the outbox");
        let Outbound::Frame(frame) = message else {
            continue;
        };
        if frame.id != Some(job_id) {
            continue;
        }
        let entity_status = frame.entity["status"].as_str().unwrap_or_default().to_string();
        if entity_status == "loading" && frame.entity["rows_processed"].as_i64().unwrap_or(0) > 0 {
            row_updates.push(frame.entity["rows_processed"].as_i64().unwrap_or(0));
        }
        if entity_status == "data_load_completed" {
            break frame;
        }
    };
    assert_eq!(row_updates, vec![1, 2, 3]);
    assert_eq!(terminal.entity["rows_failed"], 0);

    shutdown_tx.send(true).unwrap();
    listener.await.unwrap();
}
