//! Import workers
//!
//! Each worker polls the queue, claims at most one job at a time and runs it
//! through the [`RowProcessor`]. Distinct jobs run fully in parallel across
//! workers; rows within a job are sequential.

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::ingest::analyzer::AnalysisConfig;
use crate::ingest::processor::RowProcessor;
use crate::ingest::queue::QueueService;
use crate::ingest::store::{PgUnitStore, UnitStore};

const WORKER_TYPE: &str = "import";

pub struct ImportWorker {
    worker_id: Uuid,
    hostname: String,
    queue: QueueService,
    processor: RowProcessor,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
}

impl ImportWorker {
    pub fn new(
        queue: QueueService,
        store: Arc<dyn UnitStore>,
        analysis: AnalysisConfig,
        config: WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            hostname: hostname::get()
                .unwrap_or_else(|_| "unknown".into())
                .to_string_lossy()
                .to_string(),
            processor: RowProcessor::new(Arc::new(queue.clone()), store, analysis),
            queue,
            config,
            shutdown,
        }
    }

    /// Start the poll loop
    pub fn start(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(worker_id = %self.worker_id, hostname = %self.hostname, "Import worker started");

            loop {
                if *self.shutdown.borrow() {
                    break;
                }

                match self.poll_once().await {
                    Ok(true) => continue,
                    Ok(false) => {},
                    Err(e) => {
                        error!(worker_id = %self.worker_id, error = %format!("{e:#}"), "Import worker poll failed");
                    },
                }

                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval()) => {},
                    _ = self.shutdown.changed() => {},
                }
            }

            info!(worker_id = %self.worker_id, "Import worker stopped");
        })
    }

    /// Claim and process one job; returns whether a job was found
    async fn poll_once(&self) -> Result<bool> {
        let Some(job) = self.queue.dequeue().await.context("Failed to dequeue import job")? else {
            return Ok(false);
        };

        info!(worker_id = %self.worker_id, job_id = job.id, slug = %job.slug, "Processing import job");
        self.announce(true).await;
        let result = self.processor.process(&job).await;
        self.announce(false).await;

        let status = result?;
        info!(worker_id = %self.worker_id, job_id = job.id, status = %status, "Import job processed");
        Ok(true)
    }

    /// Publish a start/stop event on the worker status channel
    async fn announce(&self, running: bool) {
        let payload = json!({ "type": WORKER_TYPE, "status": running }).to_string();
        if let Err(e) = sqlx::query("SELECT pg_notify('worker_status', $1)")
            .bind(&payload)
            .execute(self.queue.pool())
            .await
        {
            tracing::warn!(worker_id = %self.worker_id, error = %e, "Failed to publish worker status");
        }
    }
}

/// Spawn the configured number of workers sharing one shutdown signal
pub fn spawn_workers(
    queue: QueueService,
    analysis: AnalysisConfig,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let store: Arc<dyn UnitStore> = Arc::new(PgUnitStore::new(queue.pool().clone()));

    (0..config.workers)
        .map(|_| {
            ImportWorker::new(
                queue.clone(),
                store.clone(),
                analysis.clone(),
                config.clone(),
                shutdown.clone(),
            )
            .start()
        })
        .collect()
}
