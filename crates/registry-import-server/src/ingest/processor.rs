//! Row processor
//!
//! Runs one claimed job to completion:
//!
//! ```text
//! Claimed -> for each row: Parse -> Analyze -> Resolve -> Persist/Skip -> Log
//!         -> Finalize
//! ```
//!
//! Rows are handled strictly in file order. A failing row is logged and
//! skipped; a failure outside the row loop still finalizes the job as
//! partially completed so it never stays in `loading`.

use anyhow::{anyhow, Context};
use chrono::Utc;
use futures::StreamExt;
use registry_common::types::ImportJobStatus;
use std::sync::Arc;

use crate::ingest::analyzer::{self, AnalysisConfig, AnalysisResult};
use crate::ingest::mapper::Mapper;
use crate::ingest::policy::{self, Action};
use crate::ingest::queue::{JobLedger, RowLog};
use crate::ingest::reader::ReaderError;
use crate::ingest::store::UnitStore;
use crate::ingest::types::{DataSource, ImportJob, LogStatus, RawRow, UploadType};
use crate::ingest::units::ParsedUnit;

pub const EMPTY_UPLOAD_NOTE: &str = "upload file is empty";

/// Row tallies of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub rows: u64,
    pub done: u64,
    pub failed: u64,
}

impl RunSummary {
    fn record(&mut self, status: LogStatus) {
        self.rows += 1;
        if status.is_failure() {
            self.failed += 1;
        } else {
            self.done += 1;
        }
    }

    pub fn final_status(&self) -> ImportJobStatus {
        if self.failed == 0 {
            ImportJobStatus::DataLoadCompleted
        } else {
            ImportJobStatus::DataLoadCompletedPartially
        }
    }
}

/// Everything a row needs that is fixed for the job
struct JobContext<'a> {
    job: &'a ImportJob,
    source: &'a DataSource,
    mapper: Mapper,
    analysis: AnalysisConfig,
}

struct RowOutcome {
    status: LogStatus,
    unit: Option<ParsedUnit>,
    note: Option<String>,
    analysis: Option<AnalysisResult>,
}

impl RowOutcome {
    fn error(unit: Option<ParsedUnit>, note: impl Into<String>) -> Self {
        Self {
            status: LogStatus::Error,
            unit,
            note: Some(note.into()),
            analysis: None,
        }
    }
}

pub struct RowProcessor {
    ledger: Arc<dyn JobLedger>,
    store: Arc<dyn UnitStore>,
    analysis: AnalysisConfig,
}

impl RowProcessor {
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        store: Arc<dyn UnitStore>,
        analysis: AnalysisConfig,
    ) -> Self {
        Self {
            ledger,
            store,
            analysis,
        }
    }

    /// Process a claimed job and set its terminal status
    #[tracing::instrument(skip(self, job), fields(job_id = job.id, slug = %job.slug))]
    pub async fn process(&self, job: &ImportJob) -> anyhow::Result<ImportJobStatus> {
        let started = std::time::Instant::now();

        let (status, note) = match self.run(job).await {
            Ok(summary) => {
                tracing::info!(
                    rows = summary.rows,
                    done = summary.done,
                    failed = summary.failed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Import job rows processed"
                );
                (summary.final_status(), None)
            },
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "Import job failed");
                (
                    ImportJobStatus::DataLoadCompletedPartially,
                    Some(format!("{e:#}")),
                )
            },
        };

        let finished = self
            .ledger
            .finish(job.id, status, note.as_deref())
            .await
            .context("Failed to finalize import job")?;

        if finished {
            if let Some(table) = &job.upload_table_name {
                if let Err(e) = self.ledger.drop_staging(table).await {
                    tracing::warn!(table = %table, error = %e, "Failed to drop staging table");
                }
            }
        }

        Ok(status)
    }

    async fn run(&self, job: &ImportJob) -> anyhow::Result<RunSummary> {
        let source = self
            .ledger
            .data_source(job.data_source_id)
            .await?
            .ok_or_else(|| anyhow!("Data source {} not found", job.data_source_id))?;

        let ctx = JobContext {
            job,
            source: &source,
            mapper: Mapper::compile(source.stat_unit_type, &source.variables_mapping)
                .context("Invalid data source mapping")?,
            analysis: self.analysis.with_attributes(&source.attributes_to_check),
        };

        let mut rows = self.ledger.open_rows(job, &source)?;
        let mut summary = RunSummary::default();

        while let Some(item) = rows.next().await {
            let status = match item {
                Ok(row) => self.process_row(&ctx, row).await,
                Err(e) if e.is_row_level() => self.reject_record(&ctx, e).await,
                Err(e) => return Err(anyhow::Error::new(e).context("Failed to read input")),
            };
            summary.record(status);
        }

        if summary.rows == 0 {
            let now = Utc::now();
            self.write_log(RowLog {
                job_id: job.id,
                target_stat_id: None,
                stat_unit_name: None,
                raw: serde_json::json!({}),
                unit: None,
                started_at: now,
                ended_at: now,
                status: LogStatus::Error,
                note: Some(EMPTY_UPLOAD_NOTE.to_string()),
                errors: None,
                summary: None,
            })
            .await;
            summary.failed += 1;
        }

        Ok(summary)
    }

    async fn process_row(&self, ctx: &JobContext<'_>, row: RawRow) -> LogStatus {
        let started_at = Utc::now();
        let outcome = self.evaluate(ctx, &row).await;
        let ended_at = Utc::now();

        let unit_json = outcome
            .unit
            .as_ref()
            .and_then(|unit| serde_json::to_value(unit).ok());
        let (errors, summary) = match &outcome.analysis {
            Some(analysis) => (
                serde_json::to_value(&analysis.issues).ok(),
                serde_json::to_value(&analysis.summary).ok(),
            ),
            None => (None, None),
        };

        tracing::debug!(
            stat_id = ?ctx.mapper.business_id(&row),
            status = outcome.status.as_str(),
            note = ?outcome.note,
            "Row processed"
        );

        self.write_log(RowLog {
            job_id: ctx.job.id,
            target_stat_id: outcome
                .unit
                .as_ref()
                .and_then(|u| u.business_id().map(str::to_string))
                .or_else(|| ctx.mapper.business_id(&row)),
            stat_unit_name: outcome.unit.as_ref().and_then(|u| u.name().map(str::to_string)),
            raw: row.to_json(),
            unit: unit_json,
            started_at,
            ended_at,
            status: outcome.status,
            note: outcome.note,
            errors,
            summary,
        })
        .await;

        outcome.status
    }

    /// Log a record the reader could not decode
    async fn reject_record(&self, ctx: &JobContext<'_>, error: ReaderError) -> LogStatus {
        let now = Utc::now();
        let raw = match &error {
            ReaderError::InvalidRecord { raw, .. } => serde_json::json!({ "record": raw }),
            _ => serde_json::json!({}),
        };
        tracing::debug!(error = %error, "Row rejected by reader");

        self.write_log(RowLog {
            job_id: ctx.job.id,
            target_stat_id: None,
            stat_unit_name: None,
            raw,
            unit: None,
            started_at: now,
            ended_at: now,
            status: LogStatus::Error,
            note: Some(error.to_string()),
            errors: None,
            summary: None,
        })
        .await;

        LogStatus::Error
    }

    /// Map, analyze, resolve and persist one row
    async fn evaluate(&self, ctx: &JobContext<'_>, row: &RawRow) -> RowOutcome {
        let kind = ctx.mapper.kind();
        let business_id = ctx.mapper.business_id(row);

        let mut exists = false;
        let mut existing = None;
        if let Some(id) = &business_id {
            exists = match self.store.exists(kind, id).await {
                Ok(exists) => exists,
                Err(e) => return RowOutcome::error(None, e.to_string()),
            };
            if exists {
                existing = match self.store.load(kind, id).await {
                    Ok(unit) => unit,
                    Err(e) => return RowOutcome::error(None, e.to_string()),
                };
            }
        }

        let unit = ctx.mapper.map_row(row, existing);

        if ctx.source.upload_type == UploadType::StatUnits {
            let analysis = analyzer::analyze(&unit, &ctx.analysis);
            if !analysis.is_empty() {
                return RowOutcome {
                    status: LogStatus::Warning,
                    unit: Some(unit),
                    note: Some(analysis.note()),
                    analysis: Some(analysis),
                };
            }
        }

        let action = policy::decide(ctx.source.priority, exists, ctx.source.allowed_operations);
        match policy::apply(self.store.as_ref(), action, &unit, &ctx.source.name).await {
            Ok(Action::Reject(reason)) => RowOutcome {
                status: LogStatus::Warning,
                unit: Some(unit),
                note: Some(reason.message().to_string()),
                analysis: None,
            },
            Ok(_) => RowOutcome {
                status: LogStatus::Done,
                unit: Some(unit),
                note: None,
                analysis: None,
            },
            Err(e) => RowOutcome::error(Some(unit), e.to_string()),
        }
    }

    /// Log writes never fail the row
    async fn write_log(&self, entry: RowLog) {
        if let Err(e) = self.ledger.log_row(&entry).await {
            tracing::error!(job_id = entry.job_id, error = %e, "Failed to write upload log entry");
        }
    }
}
