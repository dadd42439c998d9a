//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Main error type for shared registry code
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown job status: {0}")]
    UnknownStatus(String),

    #[error("Unknown subscription scope: {0}")]
    UnknownScope(String),

    #[error("Unknown notification verb: {0}")]
    UnknownVerb(String),

    #[error("Unknown notification channel: {0}")]
    UnknownChannel(String),

    #[error("Invalid id list: {0}")]
    InvalidIds(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
