//! Bulk import pipeline
//!
//! # Architecture
//!
//! - **types** / **units**: data sources, jobs, raw rows and the typed unit variants
//! - **mapper**: compiled source-key to unit-path mapping
//! - **analyzer**: mandatory-field, connection and calculation checks
//! - **policy**: trust-priority conflict resolution
//! - **store**: persistence of statistical units
//! - **queue**: claim, reclaim, finalize and audit-log primitives
//! - **reader**: row streams over staging tables and server-side files
//! - **processor**: per-job row loop
//! - **worker** / **scheduler**: background workers and the reclaim timer

pub mod analyzer;
pub mod mapper;
pub mod policy;
pub mod processor;
pub mod queue;
pub mod reader;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod units;
pub mod worker;

pub use processor::RowProcessor;
pub use queue::{JobLedger, QueueError, QueueService};
pub use scheduler::ReclaimScheduler;
pub use worker::spawn_workers;
