//! Create import job command
//!
//! Declares a job against a data source. A job that names a server-side file
//! goes straight to `in_queue`; otherwise it waits for an upload through the
//! gateway.

use registry_common::types::ImportJobStatus;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::path::Path;
use uuid::Uuid;

use crate::db::{is_foreign_key_violation, is_unique_violation};
use crate::features::shared::validation::{validate_slug, SlugValidationError};
use crate::ingest::types::{ImportJob, ImportJobRow, IMPORT_JOB_COLUMNS};

pub const MAX_SLUG_LENGTH: usize = 128;
pub const MAX_DESCRIPTION_LENGTH: usize = 1000;
pub const MAX_FILE_PATH_LENGTH: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateImportJobCommand {
    pub data_source_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Server-side file to import instead of an upload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default)]
    pub skip_lines_count: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateImportJobError {
    #[error("Slug validation failed: {0}")]
    SlugValidation(#[from] SlugValidationError),

    #[error("Skip line count cannot be negative")]
    NegativeSkipCount,

    #[error("File path cannot be empty")]
    EmptyFilePath,

    #[error("Description is longer than {MAX_DESCRIPTION_LENGTH} characters")]
    DescriptionTooLong,

    #[error("File path is longer than {MAX_FILE_PATH_LENGTH} characters")]
    FilePathTooLong,

    #[error("Data source '{0}' not found")]
    DataSourceNotFound(Uuid),

    #[error("Import job '{0}' already exists")]
    DuplicateSlug(String),

    #[error("Invalid stored import job: {0}")]
    InvalidRecord(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CreateImportJobCommand {
    pub fn validate(&self) -> Result<(), CreateImportJobError> {
        if let Some(slug) = &self.slug {
            validate_slug(slug, MAX_SLUG_LENGTH)?;
        }
        if self.skip_lines_count < 0 {
            return Err(CreateImportJobError::NegativeSkipCount);
        }
        if self.file_path.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err(CreateImportJobError::EmptyFilePath);
        }
        if self
            .description
            .as_deref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LENGTH)
        {
            return Err(CreateImportJobError::DescriptionTooLong);
        }
        if self
            .file_path
            .as_deref()
            .is_some_and(|p| p.chars().count() > MAX_FILE_PATH_LENGTH)
        {
            return Err(CreateImportJobError::FilePathTooLong);
        }
        Ok(())
    }

    fn initial_status(&self) -> ImportJobStatus {
        if self.file_path.is_some() {
            ImportJobStatus::InQueue
        } else {
            ImportJobStatus::WaitingForUpload
        }
    }
}

fn generated_slug() -> String {
    format!("job-{}", Uuid::new_v4().simple())
}

#[tracing::instrument(skip(pool, command), fields(data_source_id = %command.data_source_id))]
pub async fn handle(
    pool: PgPool,
    user_id: Uuid,
    command: CreateImportJobCommand,
) -> Result<ImportJob, CreateImportJobError> {
    command.validate()?;

    let slug = command.slug.clone().unwrap_or_else(generated_slug);
    let file_name = command.file_path.as_deref().and_then(|p| {
        Path::new(p)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    });

    let sql = format!(
        r#"
        INSERT INTO import_jobs (
            slug, description, data_source_id, user_id, file_name, file_path,
            skip_lines_count, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {IMPORT_JOB_COLUMNS}
        "#
    );

    let row: ImportJobRow = sqlx::query_as(&sql)
        .bind(&slug)
        .bind(&command.description)
        .bind(command.data_source_id)
        .bind(user_id)
        .bind(&file_name)
        .bind(&command.file_path)
        .bind(command.skip_lines_count)
        .bind(command.initial_status().as_str())
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CreateImportJobError::DuplicateSlug(slug.clone())
            } else if is_foreign_key_violation(&e) {
                CreateImportJobError::DataSourceNotFound(command.data_source_id)
            } else {
                CreateImportJobError::Database(e)
            }
        })?;

    let job =
        ImportJob::try_from(row).map_err(|e| CreateImportJobError::InvalidRecord(e.to_string()))?;
    tracing::info!(job_id = job.id, slug = %job.slug, status = %job.status, "Import job created");
    Ok(job)
}
