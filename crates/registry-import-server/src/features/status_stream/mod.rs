//! Live import job status over server-sent events

pub mod queries;
pub mod routes;

pub use routes::{status_stream_routes, StreamState};
