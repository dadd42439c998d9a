use crate::api::response::{ApiResponse, ErrorResponse};
use crate::middleware::auth::AuthUser;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;

use super::{
    commands::{CreateImportJobCommand, CreateImportJobError},
    queries::{GetImportJobError, GetImportJobQuery, ListUploadLogsError, ListUploadLogsQuery},
};

pub fn import_jobs_routes() -> Router<PgPool> {
    Router::new()
        .route("/", post(create_import_job))
        .route("/:id", get(get_import_job))
        .route("/:id/logs", get(list_upload_logs))
}

#[tracing::instrument(skip(pool, command), fields(user_id = %user.user_id))]
async fn create_import_job(
    State(pool): State<PgPool>,
    user: AuthUser,
    Json(command): Json<CreateImportJobCommand>,
) -> Result<Response, ImportJobApiError> {
    let job = super::commands::create::handle(pool, user.user_id, command).await?;

    tracing::info!(job_id = job.id, slug = %job.slug, "Import job created via API");

    Ok((StatusCode::CREATED, Json(ApiResponse::success(job))).into_response())
}

#[tracing::instrument(skip(pool))]
async fn get_import_job(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<Response, ImportJobApiError> {
    let job = super::queries::get::handle(pool, GetImportJobQuery { id }).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(job))).into_response())
}

#[tracing::instrument(skip(pool, query))]
async fn list_upload_logs(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Query(mut query): Query<ListUploadLogsQuery>,
) -> Result<Response, ImportJobApiError> {
    query.job_id = id;
    let page = super::queries::logs::handle(pool, query).await?;

    tracing::debug!(
        job_id = id,
        count = page.items.len(),
        total = page.pagination.total,
        "Upload logs listed via API"
    );

    let meta = json!({ "pagination": page.pagination });
    Ok((StatusCode::OK, Json(ApiResponse::success_with_meta(page.items, meta))).into_response())
}

#[derive(Debug, thiserror::Error)]
enum ImportJobApiError {
    #[error(transparent)]
    Create(#[from] CreateImportJobError),
    #[error(transparent)]
    Get(#[from] GetImportJobError),
    #[error(transparent)]
    Logs(#[from] ListUploadLogsError),
}

impl IntoResponse for ImportJobApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ImportJobApiError::Create(
                CreateImportJobError::SlugValidation(_)
                | CreateImportJobError::NegativeSkipCount
                | CreateImportJobError::EmptyFilePath
                | CreateImportJobError::DescriptionTooLong
                | CreateImportJobError::FilePathTooLong,
            ) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ImportJobApiError::Create(CreateImportJobError::DataSourceNotFound(_))
            | ImportJobApiError::Get(GetImportJobError::NotFound(_))
            | ImportJobApiError::Logs(ListUploadLogsError::JobNotFound(_)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            },
            ImportJobApiError::Create(CreateImportJobError::DuplicateSlug(_)) => {
                (StatusCode::CONFLICT, "CONFLICT")
            },
            ImportJobApiError::Create(
                CreateImportJobError::Database(_) | CreateImportJobError::InvalidRecord(_),
            )
            | ImportJobApiError::Get(
                GetImportJobError::Database(_) | GetImportJobError::InvalidRecord(_),
            )
            | ImportJobApiError::Logs(ListUploadLogsError::Database(_)) => {
                tracing::error!(error = %self, "Import job request failed");
                let error = ErrorResponse::new("INTERNAL_ERROR", "A database error occurred");
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response();
            },
        };

        (status, Json(ErrorResponse::new(code, self.to_string()))).into_response()
    }
}
