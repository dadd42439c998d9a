//! Server-wide error type for extractors and shared handlers
//!
//! Feature slices keep their own error enums; this one covers what sits in
//! front of them, such as credential checks.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::api::response::ErrorResponse;

/// Result type alias for handlers that render [`AppError`]
pub type AppResult<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                ErrorResponse::new("INTERNAL_ERROR", "A database error occurred")
            },
            AppError::Unauthorized(message) => ErrorResponse::new("UNAUTHORIZED", message),
            AppError::Forbidden(message) => ErrorResponse::new("FORBIDDEN", message),
        };

        body.into_response_with(status)
    }
}
