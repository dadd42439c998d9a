//! Get import job query

use sqlx::PgPool;

use crate::ingest::types::{ImportJob, ImportJobRow, IMPORT_JOB_COLUMNS};

#[derive(Debug, Clone)]
pub struct GetImportJobQuery {
    pub id: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum GetImportJobError {
    #[error("Import job {0} not found")]
    NotFound(i64),

    #[error("Invalid stored import job: {0}")]
    InvalidRecord(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[tracing::instrument(skip(pool))]
pub async fn handle(pool: PgPool, query: GetImportJobQuery) -> Result<ImportJob, GetImportJobError> {
    let row: Option<ImportJobRow> = sqlx::query_as(&format!(
        "SELECT {IMPORT_JOB_COLUMNS} FROM import_jobs WHERE id = $1"
    ))
    .bind(query.id)
    .fetch_optional(&pool)
    .await?;

    let row = row.ok_or(GetImportJobError::NotFound(query.id))?;
    ImportJob::try_from(row).map_err(|e| GetImportJobError::InvalidRecord(e.to_string()))
}
