use crate::api::response::{ApiResponse, ErrorResponse};
use crate::config::UploadConfig;
use crate::middleware::auth::AuthUser;
use axum::{
    extract::{DefaultBodyLimit, FromRef, Multipart, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use sqlx::PgPool;

use super::gateway::{self, UploadError, UploadMeta};

#[derive(Clone)]
pub struct UploadState {
    pub db: PgPool,
    pub config: UploadConfig,
}

impl FromRef<UploadState> for PgPool {
    fn from_ref(state: &UploadState) -> Self {
        state.db.clone()
    }
}

pub fn upload_routes() -> Router<UploadState> {
    Router::new()
        .route("/upload", post(upload_file))
        .layer(DefaultBodyLimit::disable())
}

/// Multipart body: a `jobSlug` text field followed by the `file` field
#[tracing::instrument(skip(state, headers, multipart), fields(user_id = %user.user_id))]
async fn upload_file(
    State(state): State<UploadState>,
    user: AuthUser,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, UploadError> {
    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut slug: Option<String> = None;
    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("jobSlug") => {
                let text = field.text().await?;
                slug = Some(text.trim().to_string()).filter(|s| !s.is_empty());
            },
            Some("file") => {
                let slug = slug.clone().ok_or(UploadError::MissingSlug)?;
                let meta = UploadMeta {
                    file_name: field.file_name().map(str::to_string),
                    content_length,
                };
                let outcome =
                    gateway::upload(&state.db, &state.config, user, &slug, meta, &mut field)
                        .await?;
                return Ok((StatusCode::OK, Json(ApiResponse::success(outcome))).into_response());
            },
            other => {
                tracing::debug!(field = ?other, "Ignoring multipart field");
            },
        }
    }

    Err(if slug.is_none() {
        UploadError::MissingSlug
    } else {
        UploadError::MissingFile
    })
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            UploadError::MissingSlug
            | UploadError::MissingFile
            | UploadError::NoNewline(_)
            | UploadError::Header(_)
            | UploadError::InvalidData(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            UploadError::Multipart(e) => (e.status(), "VALIDATION_ERROR"),
            UploadError::JobNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            UploadError::NotOwner(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            UploadError::InvalidState { .. } => (StatusCode::CONFLICT, "CONFLICT"),
            UploadError::Database(_) | UploadError::InvalidRecord(_) => {
                tracing::error!(error = %self, "Upload failed");
                let error = ErrorResponse::new("INTERNAL_ERROR", "A database error occurred");
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response();
            },
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Upload failed");
        } else {
            tracing::warn!(error = %self, "Upload rejected");
        }
        (status, Json(ErrorResponse::new(code, self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let cases = [
            (UploadError::MissingSlug, StatusCode::BAD_REQUEST),
            (UploadError::NoNewline(10240), StatusCode::BAD_REQUEST),
            (UploadError::JobNotFound("x".into()), StatusCode::NOT_FOUND),
            (UploadError::NotOwner("x".into()), StatusCode::FORBIDDEN),
            (UploadError::InvalidRecord("bad".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_database_details_are_not_leaked() {
        let response = UploadError::InvalidRecord("secret column".into()).into_response();
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert!(!body.to_string().contains("secret column"));
    }
}
