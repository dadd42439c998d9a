//! Upload gateway
//!
//! Streams a multipart file body into the job's staging relation with
//! `COPY ... FROM STDIN`. Only the prefix up to the header row is buffered;
//! every later chunk is forwarded as it arrives and each send is awaited,
//! so a slow database slows the client down instead of filling memory.
//!
//! The job moves `waiting_for_upload -> uploading` before the body is read
//! and `uploading -> in_queue` in the same transaction that loads the rows,
//! so a worker never sees a queued job without its staged data.

use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use futures::{Stream, StreamExt};
use registry_common::types::ImportJobStatus;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::header::{locate_header, parse_header, HeaderError, HeaderProbe, StagingColumns};
use crate::config::UploadConfig;
use crate::db::quote_ident;
use crate::ingest::reader::staging;
use crate::ingest::types::{
    DataSource, DataSourceRow, ImportJob, ImportJobRow, DATA_SOURCE_COLUMNS, IMPORT_JOB_COLUMNS,
};
use crate::middleware::auth::AuthUser;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Missing 'jobSlug' field before the file")]
    MissingSlug,

    #[error("Missing 'file' field")]
    MissingFile,

    #[error("Import job '{0}' not found")]
    JobNotFound(String),

    #[error("Import job '{0}' belongs to another user")]
    NotOwner(String),

    #[error("Import job '{slug}' is {status}, expected waiting_for_upload")]
    InvalidState { slug: String, status: ImportJobStatus },

    #[error("No line break found within the first {0} bytes of a line")]
    NoNewline(usize),

    #[error("Invalid header row: {0}")]
    Header(#[from] HeaderError),

    #[error("Invalid file content: {0}")]
    InvalidData(String),

    #[error("Malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Returned to the client once the rows are staged and the job is queued
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub job_id: i64,
    pub slug: String,
    pub rows_staged: u64,
    pub columns: Vec<String>,
}

/// Metadata of the file part
#[derive(Debug, Clone, Default)]
pub struct UploadMeta {
    pub file_name: Option<String>,
    /// Declared request size, used for progress only
    pub content_length: Option<u64>,
}

/// Claim the job named by `slug` and stage `body` into it
#[tracing::instrument(skip(pool, config, body, meta), fields(user_id = %user.user_id))]
pub async fn upload<S>(
    pool: &PgPool,
    config: &UploadConfig,
    user: AuthUser,
    slug: &str,
    meta: UploadMeta,
    body: S,
) -> Result<UploadOutcome, UploadError>
where
    S: Stream<Item = Result<Bytes, MultipartError>> + Unpin,
{
    let (job, source) = claim(pool, user.user_id, slug).await?;
    let mut guard = ReleaseGuard::new(pool.clone(), job.id);

    let outcome = stage(pool, config, &job, &source, meta, body).await?;
    guard.disarm();

    tracing::info!(
        job_id = job.id,
        slug = %job.slug,
        rows = outcome.rows_staged,
        "Upload staged, job queued"
    );
    Ok(outcome)
}

/// Check ownership and move the job to `uploading`
async fn claim(
    pool: &PgPool,
    user_id: Uuid,
    slug: &str,
) -> Result<(ImportJob, DataSource), UploadError> {
    let sql = format!("SELECT {IMPORT_JOB_COLUMNS} FROM import_jobs WHERE slug = $1");
    let row: Option<ImportJobRow> = sqlx::query_as(&sql).bind(slug).fetch_optional(pool).await?;
    let job = match row {
        Some(row) => {
            ImportJob::try_from(row).map_err(|e| UploadError::InvalidRecord(e.to_string()))?
        },
        None => return Err(UploadError::JobNotFound(slug.to_string())),
    };

    if job.user_id != Some(user_id) {
        return Err(UploadError::NotOwner(slug.to_string()));
    }

    let sql = format!("SELECT {DATA_SOURCE_COLUMNS} FROM data_sources WHERE id = $1");
    let source: DataSourceRow = sqlx::query_as(&sql)
        .bind(job.data_source_id)
        .fetch_one(pool)
        .await?;
    let source =
        DataSource::try_from(source).map_err(|e| UploadError::InvalidRecord(e.to_string()))?;

    let claimed = sqlx::query(
        r#"
        UPDATE import_jobs
        SET status = $2, upload_completed_pct = 0
        WHERE id = $1 AND status = $3
        "#,
    )
    .bind(job.id)
    .bind(ImportJobStatus::Uploading.as_str())
    .bind(ImportJobStatus::WaitingForUpload.as_str())
    .execute(pool)
    .await?
    .rows_affected();

    if claimed == 0 {
        return Err(UploadError::InvalidState {
            slug: slug.to_string(),
            status: job.status,
        });
    }

    Ok((job, source))
}

async fn stage<S>(
    pool: &PgPool,
    config: &UploadConfig,
    job: &ImportJob,
    source: &DataSource,
    meta: UploadMeta,
    mut body: S,
) -> Result<UploadOutcome, UploadError>
where
    S: Stream<Item = Result<Bytes, MultipartError>> + Unpin,
{
    let delimiter = source.delimiter_byte();
    let skip_lines = match job.skip_lines_count {
        n if n > 0 => n as usize,
        _ => source.csv_skip_count.max(0) as usize,
    };

    let mut prefix = Vec::new();
    let (start, end) = loop {
        match locate_header(&prefix, skip_lines, config.newline_probe_bytes) {
            HeaderProbe::Found { start, end } => break (start, end),
            HeaderProbe::NoNewline => return Err(UploadError::NoNewline(config.newline_probe_bytes)),
            HeaderProbe::NeedMore => match body.next().await {
                Some(chunk) => prefix.extend_from_slice(&chunk?),
                None => return Err(UploadError::NoNewline(config.newline_probe_bytes)),
            },
        }
    };
    let columns = parse_header(&prefix[start..end], delimiter)?;
    let table = staging::table_name(job.id);

    let mut progress = Progress::new(
        pool.clone(),
        job.id,
        meta.content_length,
        config.progress_step_pct,
    );

    let mut tx = pool.begin().await?;
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(&table)))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&create_table_sql(&table, &columns))
        .execute(&mut *tx)
        .await?;

    let mut copy = tx
        .copy_in_raw(&copy_sql(&table, &columns, delimiter))
        .await
        .map_err(copy_error)?;

    copy.send(&prefix[start..]).await.map_err(copy_error)?;
    progress.advance(prefix.len() as u64).await;

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                if let Err(abort) = copy.abort("upload interrupted").await {
                    tracing::debug!(error = %abort, "COPY abort reported an error");
                }
                return Err(e.into());
            },
        };
        copy.send(chunk.as_ref()).await.map_err(copy_error)?;
        progress.advance(chunk.len() as u64).await;
    }

    let rows_staged = copy.finish().await.map_err(copy_error)?;

    sqlx::query(
        r#"
        UPDATE import_jobs
        SET status = $2,
            upload_table_name = $3,
            upload_columns = $4,
            file_name = COALESCE($5, file_name),
            upload_completed_pct = 100
        WHERE id = $1
        "#,
    )
    .bind(job.id)
    .bind(ImportJobStatus::InQueue.as_str())
    .bind(&table)
    .bind(&columns.named)
    .bind(&meta.file_name)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(UploadOutcome {
        job_id: job.id,
        slug: job.slug.clone(),
        rows_staged,
        columns: columns.named,
    })
}

fn create_table_sql(table: &str, columns: &StagingColumns) -> String {
    let mut sql = format!("CREATE TABLE {} (_row_id BIGSERIAL PRIMARY KEY", quote_ident(table));
    for column in &columns.all {
        sql.push_str(", ");
        sql.push_str(&quote_ident(column));
        sql.push_str(" TEXT");
    }
    sql.push(')');
    sql
}

fn copy_sql(table: &str, columns: &StagingColumns, delimiter: u8) -> String {
    let column_list = columns
        .all
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let delimiter = (delimiter as char).to_string().replace('\'', "''");
    format!(
        "COPY {} ({column_list}) FROM STDIN WITH (FORMAT csv, HEADER true, DELIMITER '{delimiter}')",
        quote_ident(table)
    )
}

/// Rows the server cannot parse are the client's fault
fn copy_error(error: sqlx::Error) -> UploadError {
    if let sqlx::Error::Database(db_err) = &error {
        let data_error = db_err
            .code()
            .is_some_and(|code| code.starts_with("22") || code.starts_with("23"));
        if data_error {
            return UploadError::InvalidData(db_err.message().to_string());
        }
    }
    UploadError::Database(error)
}

/// Percentage of `total` covered by `sent`, capped below 100 until commit
fn percent(sent: u64, total: u64) -> i16 {
    if total == 0 {
        return 0;
    }
    (sent.saturating_mul(100) / total).min(99) as i16
}

/// Records `upload_completed_pct` on its own connection
struct Progress {
    pool: PgPool,
    job_id: i64,
    total: Option<u64>,
    step: i16,
    sent: u64,
    reported: i16,
}

impl Progress {
    fn new(pool: PgPool, job_id: i64, total: Option<u64>, step: u8) -> Self {
        Self {
            pool,
            job_id,
            total,
            step: i16::from(step.max(1)),
            sent: 0,
            reported: 0,
        }
    }

    async fn advance(&mut self, bytes: u64) {
        self.sent += bytes;
        let Some(total) = self.total else {
            return;
        };
        let pct = percent(self.sent, total);
        if pct < self.reported + self.step {
            return;
        }
        self.reported = pct;

        let result = sqlx::query(
            "UPDATE import_jobs SET upload_completed_pct = $2 WHERE id = $1 AND status = $3",
        )
        .bind(self.job_id)
        .bind(pct)
        .bind(ImportJobStatus::Uploading.as_str())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(job_id = self.job_id, error = %e, "Failed to record upload progress");
        }
    }
}

/// Puts the job back to `waiting_for_upload` unless disarmed.
/// Runs on drop so a dropped request future releases the job too.
struct ReleaseGuard {
    pool: PgPool,
    job_id: i64,
    armed: bool,
}

impl ReleaseGuard {
    fn new(pool: PgPool, job_id: i64) -> Self {
        Self {
            pool,
            job_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!(job_id = self.job_id, "No runtime to release failed upload");
            return;
        };
        let pool = self.pool.clone();
        let job_id = self.job_id;
        handle.spawn(async move {
            let result = sqlx::query(
                r#"
                UPDATE import_jobs
                SET status = $2, upload_completed_pct = 0
                WHERE id = $1 AND status = $3
                "#,
            )
            .bind(job_id)
            .bind(ImportJobStatus::WaitingForUpload.as_str())
            .bind(ImportJobStatus::Uploading.as_str())
            .execute(&pool)
            .await;

            match result {
                Ok(_) => tracing::info!(job_id, "Upload failed, job released"),
                Err(e) => tracing::error!(job_id, error = %e, "Failed to release job"),
            }
        });
    }
}
