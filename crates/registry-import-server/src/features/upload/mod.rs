//! Streaming file upload into per-job staging relations

pub mod gateway;
pub mod header;
pub mod routes;

pub use gateway::{UploadError, UploadOutcome};
pub use routes::{upload_routes, UploadState};
