//! Current state of tracked jobs, sent before live events
//!
//! Entities are built with the same `json_build_object` shape as the
//! `import_job` trigger payload, so a client cannot tell a snapshot frame
//! from a live update.

use chrono::Utc;
use registry_common::types::{Channel, NotificationFrame, Verb};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSnapshotQuery {
    pub ids: Vec<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum JobSnapshotError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[tracing::instrument(skip(pool))]
pub async fn handle(
    pool: PgPool,
    query: JobSnapshotQuery,
) -> Result<Vec<NotificationFrame>, JobSnapshotError> {
    if query.ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<(i64, serde_json::Value)> = sqlx::query_as(
        r#"
        SELECT id, json_build_object(
            'id', id,
            'slug', slug,
            'description', description,
            'data_source_id', data_source_id,
            'user_id', user_id,
            'file_name', file_name,
            'status', status,
            'upload_completed_pct', upload_completed_pct,
            'rows_processed', rows_processed,
            'rows_failed', rows_failed,
            'note', note,
            'created_at', created_at,
            'start_import_date', start_import_date,
            'end_import_date', end_import_date
        )::jsonb AS entity
        FROM import_jobs
        WHERE id = ANY($1)
        ORDER BY id
        "#,
    )
    .bind(&query.ids)
    .fetch_all(&pool)
    .await?;

    let timestamp = Utc::now();
    Ok(rows
        .into_iter()
        .map(|(id, entity)| NotificationFrame {
            channel: Channel::ImportJob,
            verb: Verb::Update,
            id: Some(id),
            entity,
            timestamp,
        })
        .collect())
}
