//! Registry Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the registry import workspace.
//!
//! # Overview
//!
//! This crate provides functionality used by both the import server and the
//! operator CLI:
//!
//! - **Logging**: `tracing` subscriber bootstrap driven by environment variables
//! - **Error Handling**: Common error type and result alias
//! - **Types**: Wire types shared by the status stream producer and consumer
//! - **Backoff**: Reconnect delay schedule for status stream clients
//!
//! # Example
//!
//! ```no_run
//! use registry_common::backoff::ReconnectPolicy;
//!
//! let policy = ReconnectPolicy::default();
//! let delay = policy.delay_for(2);
//! assert!(delay.as_millis() >= 4000);
//! ```

pub mod backoff;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{RegistryError, Result};
