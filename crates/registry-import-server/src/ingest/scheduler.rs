//! Reclaim scheduler
//!
//! Periodically puts jobs stuck in `loading` back in the queue. Runs on its
//! own timer, independent of the workers.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::ingest::queue::QueueService;

pub struct ReclaimScheduler {
    queue: QueueService,
    interval: Duration,
    timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ReclaimScheduler {
    pub fn new(
        queue: QueueService,
        interval: Duration,
        timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            interval,
            timeout,
            shutdown,
        }
    }

    /// Start the reclaim timer
    pub fn start(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                timeout_secs = self.timeout.as_secs(),
                "Reclaim scheduler started"
            );

            let mut timer = tokio::time::interval(self.interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if let Err(e) = self.queue.reclaim_timed_out(self.timeout).await {
                            error!(error = %e, "Failed to reclaim timed out import jobs");
                        }
                    },
                    _ = self.shutdown.changed() => break,
                }
                if *self.shutdown.borrow() {
                    break;
                }
            }

            info!("Reclaim scheduler stopped");
        })
    }
}
