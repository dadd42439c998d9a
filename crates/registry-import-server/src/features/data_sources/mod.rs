//! Data source templates

pub mod commands;
pub mod queries;
pub mod routes;

pub use routes::data_sources_routes;
