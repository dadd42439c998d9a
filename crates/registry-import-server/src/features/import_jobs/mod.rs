//! Import job declaration, status and upload logs

pub mod commands;
pub mod queries;
pub mod routes;

pub use routes::import_jobs_routes;
