//! Get data source query

use sqlx::PgPool;
use uuid::Uuid;

use crate::ingest::types::{DataSource, DataSourceRow, DATA_SOURCE_COLUMNS};

#[derive(Debug, Clone)]
pub struct GetDataSourceQuery {
    pub id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum GetDataSourceError {
    #[error("Data source '{0}' not found")]
    NotFound(Uuid),

    #[error("Invalid stored data source: {0}")]
    InvalidRecord(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[tracing::instrument(skip(pool))]
pub async fn handle(pool: PgPool, query: GetDataSourceQuery) -> Result<DataSource, GetDataSourceError> {
    let row: Option<DataSourceRow> = sqlx::query_as(&format!(
        "SELECT {DATA_SOURCE_COLUMNS} FROM data_sources WHERE id = $1"
    ))
    .bind(query.id)
    .fetch_optional(&pool)
    .await?;

    let row = row.ok_or(GetDataSourceError::NotFound(query.id))?;
    DataSource::try_from(row).map_err(|e| GetDataSourceError::InvalidRecord(e.to_string()))
}
