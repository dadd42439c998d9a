//! Upload log listing
//!
//! Entries come back in processing order, optionally filtered by status.

use serde::Deserialize;
use sqlx::PgPool;

use crate::features::shared::{Paginated, PaginationParams};
use crate::ingest::types::{LogStatus, UploadLogEntry};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListUploadLogsQuery {
    #[serde(skip)]
    pub job_id: i64,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<LogStatus>,
}

#[derive(Debug, thiserror::Error)]
pub enum ListUploadLogsError {
    #[error("Import job {0} not found")]
    JobNotFound(i64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[tracing::instrument(skip(pool))]
pub async fn handle(
    pool: PgPool,
    query: ListUploadLogsQuery,
) -> Result<Paginated<UploadLogEntry>, ListUploadLogsError> {
    let job_exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM import_jobs WHERE id = $1)")
            .bind(query.job_id)
            .fetch_one(&pool)
            .await?;
    if !job_exists {
        return Err(ListUploadLogsError::JobNotFound(query.job_id));
    }

    let pagination = PaginationParams::new(query.page, query.per_page);
    let status = query.status.map(|s| s.as_str());

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM upload_logs
        WHERE import_job_id = $1 AND ($2::text IS NULL OR status = $2)
        "#,
    )
    .bind(query.job_id)
    .bind(status)
    .fetch_one(&pool)
    .await?;

    let items: Vec<UploadLogEntry> = sqlx::query_as(
        r#"
        SELECT id, import_job_id, target_stat_id, stat_unit_name, serialized_raw,
               serialized_unit, started_at, ended_at, status, note, errors, summary
        FROM upload_logs
        WHERE import_job_id = $1 AND ($2::text IS NULL OR status = $2)
        ORDER BY id
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(query.job_id)
    .bind(status)
    .bind(pagination.per_page())
    .bind(pagination.offset())
    .fetch_all(&pool)
    .await?;

    Ok(Paginated::new(items, &pagination, total))
}
