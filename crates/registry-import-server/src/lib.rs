//! Registry import server
//!
//! Bulk import pipeline of the business registry. Providers upload CSV
//! files that are staged in Postgres, queued as import jobs and processed
//! row by row by a pool of workers. Every row ends in an append-only
//! upload log entry, and clients follow job progress over server-sent
//! events.
//!
//! # Architecture
//!
//! ```text
//! POST /import/upload -> staging table + job in_queue
//!        |
//!   ImportWorker (dequeue) -> RowProcessor -> map -> analyze -> policy -> UnitStore
//!        |                                     |
//!   ReclaimScheduler                      upload_logs
//!
//! import_jobs triggers -> pg_notify -> ChangeListener -> Broker -> SSE connections
//! ```
//!
//! - [`features`]: HTTP slices (data sources, import jobs, upload, status stream)
//! - [`ingest`]: queue, readers, mapper, analyzer, merge policy and workers
//! - [`notifications`]: change listener and per-connection fan-out
//! - [`middleware`]: credentials, CORS and request tracing
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;
pub mod notifications;

pub use error::{AppError, AppResult};
