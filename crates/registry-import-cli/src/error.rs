//! Error types for the registry import CLI
//!
//! Messages are user facing and say what to check next.

use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// The server answered with an error envelope or status
    #[error("Server rejected the request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("File not found: '{0}'. Verify the file path exists and you have read permissions.")]
    FileNotFound(String),

    #[error("File operation failed: {0}. Check file permissions.")]
    Io(#[from] std::io::Error),

    #[error("Network request failed: {0}. Check the server URL and that the server is running.")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] registry_common::RegistryError),

    #[error("No API token. Pass --token or set REGISTRY_TOKEN.")]
    MissingToken,

    #[error("Gave up on the status stream after {attempts} failed attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Whether retrying the same request could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            CliError::Api { status, .. } => *status >= 500,
            CliError::Http(_) => true,
            CliError::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CliError::api(503, "down").is_transient());
        assert!(!CliError::api(400, "bad ids").is_transient());
        assert!(!CliError::MissingToken.is_transient());
    }
}
