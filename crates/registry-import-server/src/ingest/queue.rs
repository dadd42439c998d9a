//! Queue service
//!
//! Import jobs are the queue items. Workers claim them with a single
//! `FOR UPDATE SKIP LOCKED` statement, so concurrent claims never return the
//! same job. A job stuck in `loading` longer than the reclaim timeout is put
//! back in the queue by [`QueueService::reclaim_timed_out`]; there is no lease
//! beyond the claim timestamp.
//!
//! The row processor reaches the queue through [`JobLedger`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use registry_common::types::ImportJobStatus;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::ingest::reader::{self, staging, ReaderError, RowStream};
use crate::ingest::store::{PgUnitStore, StoreError, UnitStore};
use crate::ingest::types::{
    DataSource, DataSourceRow, ImportJob, ImportJobRow, LogStatus, UnknownVariant,
    DATA_SOURCE_COLUMNS, IMPORT_JOB_COLUMNS,
};
use crate::ingest::units::UnitKind;

/// Longest job note kept, in characters
pub const MAX_NOTE_LENGTH: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0} is not a terminal status")]
    NotTerminal(ImportJobStatus),
}

impl From<UnknownVariant> for QueueError {
    fn from(e: UnknownVariant) -> Self {
        QueueError::InvalidRecord(e.to_string())
    }
}

impl From<registry_common::RegistryError> for QueueError {
    fn from(e: registry_common::RegistryError) -> Self {
        QueueError::InvalidRecord(e.to_string())
    }
}

/// One processed row, ready to be appended to the job's upload log
#[derive(Debug, Clone)]
pub struct RowLog {
    pub job_id: i64,
    pub target_stat_id: Option<String>,
    pub stat_unit_name: Option<String>,
    pub raw: serde_json::Value,
    pub unit: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: LogStatus,
    pub note: Option<String>,
    pub errors: Option<serde_json::Value>,
    pub summary: Option<serde_json::Value>,
}

/// Job bookkeeping the row processor depends on
#[async_trait]
pub trait JobLedger: Send + Sync {
    async fn data_source(&self, id: Uuid) -> Result<Option<DataSource>, QueueError>;

    /// Open the input rows of a claimed job
    fn open_rows(&self, job: &ImportJob, source: &DataSource) -> Result<RowStream, ReaderError>;

    async fn log_row(&self, entry: &RowLog) -> Result<(), QueueError>;

    async fn finish(
        &self,
        job_id: i64,
        status: ImportJobStatus,
        note: Option<&str>,
    ) -> Result<bool, QueueError>;

    /// Drop the staging relation of a finished upload
    async fn drop_staging(&self, table: &str) -> Result<(), ReaderError>;
}

/// Cut a note down to [`MAX_NOTE_LENGTH`] characters
pub fn bounded_note(note: &str) -> &str {
    match note.char_indices().nth(MAX_NOTE_LENGTH) {
        Some((end, _)) => &note[..end],
        None => note,
    }
}

#[derive(Clone)]
pub struct QueueService {
    pool: PgPool,
    units: PgUnitStore,
}

impl QueueService {
    pub fn new(pool: PgPool) -> Self {
        let units = PgUnitStore::new(pool.clone());
        Self { pool, units }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Claim the oldest queued job
    ///
    /// Sets `loading`, stamps `start_import_date` and resets the row counters.
    /// Returns `None` when nothing is queued or every queued job is being
    /// claimed by someone else.
    #[tracing::instrument(skip(self))]
    pub async fn dequeue(&self) -> Result<Option<ImportJob>, QueueError> {
        let sql = format!(
            r#"
            WITH next AS (
                SELECT id AS next_id
                FROM import_jobs
                WHERE status = $1
                ORDER BY created_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE import_jobs
            SET status = $2,
                start_import_date = NOW(),
                end_import_date = NULL,
                rows_processed = 0,
                rows_failed = 0
            FROM next
            WHERE import_jobs.id = next.next_id
            RETURNING {IMPORT_JOB_COLUMNS}
            "#
        );

        let row: Option<ImportJobRow> = sqlx::query_as(&sql)
            .bind(ImportJobStatus::InQueue.as_str())
            .bind(ImportJobStatus::Loading.as_str())
            .fetch_optional(&self.pool)
            .await?;

        let job = row.map(ImportJob::try_from).transpose()?;
        if let Some(job) = &job {
            tracing::info!(job_id = job.id, slug = %job.slug, "Claimed import job");
        }
        Ok(job)
    }

    /// Existence probe by unit type and business identifier
    pub async fn check_exists(&self, kind: UnitKind, stat_id: &str) -> Result<bool, QueueError> {
        Ok(self.units.exists(kind, stat_id).await?)
    }

    /// Append a write-once log entry and bump the job counters
    ///
    /// Both writes share a transaction so the counters always match the log.
    pub async fn log_row(&self, entry: &RowLog) -> Result<(), QueueError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO upload_logs (
                import_job_id, target_stat_id, stat_unit_name, serialized_raw,
                serialized_unit, started_at, ended_at, status, note, errors, summary
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.job_id)
        .bind(&entry.target_stat_id)
        .bind(&entry.stat_unit_name)
        .bind(&entry.raw)
        .bind(&entry.unit)
        .bind(entry.started_at)
        .bind(entry.ended_at)
        .bind(entry.status.as_str())
        .bind(&entry.note)
        .bind(&entry.errors)
        .bind(&entry.summary)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE import_jobs
            SET rows_processed = rows_processed + 1,
                rows_failed = rows_failed + $2
            WHERE id = $1
            "#,
        )
        .bind(entry.job_id)
        .bind(i64::from(entry.status.is_failure()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Set the terminal status of a job this worker still holds
    ///
    /// Returns false when the job is no longer `loading`, e.g. after it was
    /// reclaimed and picked up by another worker. Notes longer than
    /// [`MAX_NOTE_LENGTH`] characters are cut.
    #[tracing::instrument(skip(self, note))]
    pub async fn finish(
        &self,
        job_id: i64,
        status: ImportJobStatus,
        note: Option<&str>,
    ) -> Result<bool, QueueError> {
        if !status.is_terminal() {
            return Err(QueueError::NotTerminal(status));
        }

        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = $2, end_import_date = NOW(), note = COALESCE($3, note)
            WHERE id = $1 AND status = $4
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(note.map(bounded_note))
        .bind(ImportJobStatus::Loading.as_str())
        .execute(&self.pool)
        .await?;

        let finished = result.rows_affected() == 1;
        if finished {
            tracing::info!(job_id, status = %status, "Import job finished");
        } else {
            tracing::warn!(job_id, status = %status, "Import job was no longer loading");
        }
        Ok(finished)
    }

    /// Put jobs stuck in `loading` longer than `timeout` back in the queue
    #[tracing::instrument(skip(self))]
    pub async fn reclaim_timed_out(&self, timeout: Duration) -> Result<Vec<i64>, QueueError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE import_jobs
            SET status = $1, start_import_date = NULL
            WHERE status = $2
              AND start_import_date < NOW() - make_interval(secs => $3)
            RETURNING id
            "#,
        )
        .bind(ImportJobStatus::InQueue.as_str())
        .bind(ImportJobStatus::Loading.as_str())
        .bind(timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        if !ids.is_empty() {
            tracing::warn!(count = ids.len(), ?ids, "Reclaimed timed out import jobs");
        }
        Ok(ids)
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<ImportJob>, QueueError> {
        let row: Option<ImportJobRow> = sqlx::query_as(&format!(
            "SELECT {IMPORT_JOB_COLUMNS} FROM import_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ImportJob::try_from).transpose()?)
    }

    pub async fn get_data_source(&self, id: Uuid) -> Result<Option<DataSource>, QueueError> {
        let row: Option<DataSourceRow> = sqlx::query_as(&format!(
            "SELECT {DATA_SOURCE_COLUMNS} FROM data_sources WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DataSource::try_from).transpose()?)
    }
}

#[async_trait]
impl JobLedger for QueueService {
    async fn data_source(&self, id: Uuid) -> Result<Option<DataSource>, QueueError> {
        self.get_data_source(id).await
    }

    fn open_rows(&self, job: &ImportJob, source: &DataSource) -> Result<RowStream, ReaderError> {
        reader::open(job, source, &self.pool)
    }

    async fn log_row(&self, entry: &RowLog) -> Result<(), QueueError> {
        QueueService::log_row(self, entry).await
    }

    async fn finish(
        &self,
        job_id: i64,
        status: ImportJobStatus,
        note: Option<&str>,
    ) -> Result<bool, QueueError> {
        QueueService::finish(self, job_id, status, note).await
    }

    async fn drop_staging(&self, table: &str) -> Result<(), ReaderError> {
        staging::drop_table(&self.pool, table).await
    }
}
