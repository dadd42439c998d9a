//! List data sources query

use serde::Deserialize;
use sqlx::PgPool;

use crate::features::shared::{Paginated, PaginationParams};
use crate::ingest::types::{DataSource, DataSourceRow, DATA_SOURCE_COLUMNS};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListDataSourcesQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    /// Case-insensitive substring of the name
    pub name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ListDataSourcesError {
    #[error("Invalid stored data source: {0}")]
    InvalidRecord(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[tracing::instrument(skip(pool))]
pub async fn handle(
    pool: PgPool,
    query: ListDataSourcesQuery,
) -> Result<Paginated<DataSource>, ListDataSourcesError> {
    let pagination = PaginationParams::new(query.page, query.per_page);
    let pattern = query
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|n| format!("%{n}%"));

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM data_sources WHERE ($1::text IS NULL OR name ILIKE $1)",
    )
    .bind(&pattern)
    .fetch_one(&pool)
    .await?;

    let rows: Vec<DataSourceRow> = sqlx::query_as(&format!(
        r#"
        SELECT {DATA_SOURCE_COLUMNS}
        FROM data_sources
        WHERE ($1::text IS NULL OR name ILIKE $1)
        ORDER BY name
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(&pattern)
    .bind(pagination.per_page())
    .bind(pagination.offset())
    .fetch_all(&pool)
    .await?;

    let items = rows
        .into_iter()
        .map(DataSource::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ListDataSourcesError::InvalidRecord(e.to_string()))?;

    Ok(Paginated::new(items, &pagination, total))
}
