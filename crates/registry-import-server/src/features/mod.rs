//! Feature slices of the import API
//!
//! Each slice owns its commands, queries and routes:
//!
//! - **data_sources**: provider registration and lookup
//! - **import_jobs**: job declaration, job state and per-row upload logs
//! - **upload**: streaming multipart upload into staging storage
//! - **status_stream**: server-sent job and worker status events
//!
//! Layout per slice:
//! - `commands/` - write operations with `validate()` and `handle()`
//! - `queries/` - read operations
//! - `routes.rs` - HTTP route definitions and error mapping

pub mod data_sources;
pub mod import_jobs;
pub mod shared;
pub mod status_stream;
pub mod upload;

use axum::Router;

use crate::config::{NotificationConfig, UploadConfig};
use crate::notifications::Broker;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub db: sqlx::PgPool,
    pub broker: Broker,
    pub upload: UploadConfig,
    pub notifications: NotificationConfig,
}

/// Mount every slice under its path prefix:
/// - `/data-sources`
/// - `/import-jobs`
/// - `/import/upload`
/// - `/sse/import-jobs`
pub fn router(state: FeatureState) -> Router<()> {
    let upload_state = upload::UploadState {
        db: state.db.clone(),
        config: state.upload.clone(),
    };
    let stream_state = status_stream::StreamState {
        db: state.db.clone(),
        broker: state.broker.clone(),
        config: state.notifications.clone(),
    };

    Router::new()
        .nest("/data-sources", data_sources::data_sources_routes().with_state(state.db.clone()))
        .nest("/import-jobs", import_jobs::import_jobs_routes().with_state(state.db.clone()))
        .nest("/import", upload::upload_routes().with_state(upload_state))
        .nest("/sse", status_stream::status_stream_routes().with_state(stream_state))
}
