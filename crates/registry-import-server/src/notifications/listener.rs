//! Change listener
//!
//! One process-wide `LISTEN` connection on every [`Channel`]. Payloads are
//! decoded into [`NotificationFrame`]s and published through the [`Broker`].
//! A lost connection is re-established after a fixed delay. Worker status
//! events are debounced per worker type so a burst of short jobs collapses
//! into the last state.

use chrono::Utc;
use registry_common::types::{Channel, NotificationFrame, Verb};
use registry_common::RegistryError;
use serde::Deserialize;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::broker::Broker;
use crate::config::NotificationConfig;

#[derive(Deserialize)]
struct EntityPayload {
    verb: String,
    id: Option<i64>,
    #[serde(default)]
    entity: serde_json::Value,
}

/// Decode a raw `pg_notify` payload
pub fn decode(channel: &str, payload: &str) -> Result<NotificationFrame, RegistryError> {
    let channel: Channel = channel.parse()?;
    let timestamp = Utc::now();

    match channel {
        Channel::ImportJob => {
            let raw: EntityPayload = serde_json::from_str(payload)?;
            Ok(NotificationFrame {
                channel,
                verb: raw.verb.parse()?,
                id: raw.id,
                entity: raw.entity,
                timestamp,
            })
        },
        Channel::WorkerStatus => Ok(NotificationFrame {
            channel,
            verb: Verb::Update,
            id: None,
            entity: serde_json::from_str(payload)?,
            timestamp,
        }),
    }
}

fn worker_type(frame: &NotificationFrame) -> String {
    frame
        .entity
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Trailing debounce of worker status frames, keyed by worker type
#[derive(Default)]
struct Debouncer {
    pending: HashMap<String, (Instant, NotificationFrame)>,
}

impl Debouncer {
    fn push(&mut self, frame: NotificationFrame, delay: Duration) {
        self.pending
            .insert(worker_type(&frame), (Instant::now() + delay, frame));
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|(deadline, _)| *deadline).min()
    }

    fn take_due(&mut self, now: Instant) -> Vec<NotificationFrame> {
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        due.into_iter()
            .filter_map(|key| self.pending.remove(&key).map(|(_, frame)| frame))
            .collect()
    }
}

pub struct ChangeListener {
    pool: PgPool,
    broker: Broker,
    config: NotificationConfig,
    shutdown: watch::Receiver<bool>,
}

impl ChangeListener {
    pub fn new(
        pool: PgPool,
        broker: Broker,
        config: NotificationConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            broker,
            config,
            shutdown,
        }
    }

    /// Start listening; reconnects until shutdown
    pub fn start(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Change listener started");

            while !*self.shutdown.borrow() {
                match self.listen().await {
                    Ok(()) => break,
                    Err(e) => {
                        error!(
                            error = %e,
                            retry_secs = self.config.listener_reconnect_secs,
                            "Change listener connection lost"
                        );
                    },
                }

                tokio::select! {
                    _ = tokio::time::sleep(self.config.listener_reconnect()) => {},
                    _ = self.shutdown.changed() => {},
                }
            }

            info!("Change listener stopped");
        })
    }

    /// Run one connection; returns `Ok` only on shutdown
    async fn listen(&mut self) -> Result<(), sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener
            .listen_all(Channel::ALL.iter().map(|c| c.as_str()))
            .await?;
        info!(channels = ?Channel::ALL.map(|c| c.as_str()), "Listening for changes");

        let debounce = self.config.worker_status_debounce();
        let mut debouncer = Debouncer::default();

        loop {
            let deadline = debouncer.next_deadline();
            tokio::select! {
                notification = listener.recv() => {
                    let notification = notification?;
                    match decode(notification.channel(), notification.payload()) {
                        Ok(frame) if frame.channel == Channel::WorkerStatus => {
                            debouncer.push(frame, debounce);
                        },
                        Ok(frame) => {
                            let delivered = self.broker.publish(&frame);
                            debug!(channel = frame.channel.as_str(), id = ?frame.id, delivered, "Change published");
                        },
                        Err(e) => {
                            warn!(channel = notification.channel(), error = %e, "Ignoring malformed notification");
                        },
                    }
                },
                _ = sleep_until(deadline) => {
                    for frame in debouncer.take_due(Instant::now()) {
                        self.broker.publish(&frame);
                    }
                },
                _ = self.shutdown.changed() => return Ok(()),
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_import_job_trigger_payload() {
        let frame = decode(
            "import_job",
            r#"{"verb":"UPDATE","id":42,"entity":{"id":42,"status":"loading"}}"#,
        )
        .unwrap();
        assert_eq!(frame.channel, Channel::ImportJob);
        assert_eq!(frame.verb, Verb::Update);
        assert_eq!(frame.id, Some(42));
        assert_eq!(frame.entity["status"], "loading");
    }

    #[test]
    fn test_decode_worker_status() {
        let frame = decode("worker_status", r#"{"type":"import","status":true}"#).unwrap();
        assert_eq!(frame.channel, Channel::WorkerStatus);
        assert_eq!(frame.id, None);
        assert_eq!(frame.entity["status"], true);
    }

    #[test]
    fn test_decode_rejects_unknown_input() {
        assert!(decode("audit", "{}").is_err());
        assert!(decode("import_job", r#"{"verb":"TRUNCATE","id":1}"#).is_err());
        assert!(decode("import_job", "not json").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_keeps_last_frame_per_type() {
        let mut debouncer = Debouncer::default();
        let delay = Duration::from_millis(500);

        debouncer.push(decode("worker_status", r#"{"type":"import","status":true}"#).unwrap(), delay);
        tokio::time::advance(Duration::from_millis(300)).await;
        debouncer.push(decode("worker_status", r#"{"type":"import","status":false}"#).unwrap(), delay);

        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(debouncer.take_due(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(300)).await;
        let due = debouncer.take_due(Instant::now());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].entity["status"], false);
        assert!(debouncer.next_deadline().is_none());
    }
}
