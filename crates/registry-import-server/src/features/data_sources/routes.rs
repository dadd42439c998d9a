use crate::api::response::{ApiResponse, ErrorResponse};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    commands::{CreateDataSourceCommand, CreateDataSourceError},
    queries::{GetDataSourceError, GetDataSourceQuery, ListDataSourcesError, ListDataSourcesQuery},
};

pub fn data_sources_routes() -> Router<PgPool> {
    Router::new()
        .route("/", get(list_data_sources).post(create_data_source))
        .route("/:id", get(get_data_source))
}

#[tracing::instrument(skip(pool, command), fields(name = %command.name))]
async fn create_data_source(
    State(pool): State<PgPool>,
    Json(command): Json<CreateDataSourceCommand>,
) -> Result<Response, DataSourceApiError> {
    let source = super::commands::create::handle(pool, command).await?;

    tracing::info!(data_source_id = %source.id, "Data source created via API");

    Ok((StatusCode::CREATED, Json(ApiResponse::success(source))).into_response())
}

#[tracing::instrument(skip(pool))]
async fn get_data_source(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<Response, DataSourceApiError> {
    let source = super::queries::get::handle(pool, GetDataSourceQuery { id }).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(source))).into_response())
}

#[tracing::instrument(skip(pool, query))]
async fn list_data_sources(
    State(pool): State<PgPool>,
    Query(query): Query<ListDataSourcesQuery>,
) -> Result<Response, DataSourceApiError> {
    let page = super::queries::list::handle(pool, query).await?;

    tracing::debug!(
        count = page.items.len(),
        total = page.pagination.total,
        "Data sources listed via API"
    );

    let meta = json!({ "pagination": page.pagination });
    Ok((StatusCode::OK, Json(ApiResponse::success_with_meta(page.items, meta))).into_response())
}

#[derive(Debug, thiserror::Error)]
enum DataSourceApiError {
    #[error(transparent)]
    Create(#[from] CreateDataSourceError),
    #[error(transparent)]
    Get(#[from] GetDataSourceError),
    #[error(transparent)]
    List(#[from] ListDataSourcesError),
}

impl IntoResponse for DataSourceApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            DataSourceApiError::Create(
                CreateDataSourceError::NameValidation(_)
                | CreateDataSourceError::Mapping(_)
                | CreateDataSourceError::UnknownAttribute(_)
                | CreateDataSourceError::InvalidDelimiter(_)
                | CreateDataSourceError::NegativeSkipCount,
            ) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            DataSourceApiError::Create(CreateDataSourceError::DuplicateName(_)) => {
                (StatusCode::CONFLICT, "CONFLICT")
            },
            DataSourceApiError::Get(GetDataSourceError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            },
            DataSourceApiError::Create(
                CreateDataSourceError::Database(_) | CreateDataSourceError::InvalidRecord(_),
            )
            | DataSourceApiError::Get(
                GetDataSourceError::Database(_) | GetDataSourceError::InvalidRecord(_),
            )
            | DataSourceApiError::List(_) => {
                tracing::error!(error = %self, "Data source request failed");
                let error = ErrorResponse::new("INTERNAL_ERROR", "A database error occurred");
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response();
            },
        };

        (status, Json(ErrorResponse::new(code, self.to_string()))).into_response()
    }
}
