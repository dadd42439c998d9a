//! Status stream consumer with reconnect
//!
//! A session lasts from connect until the server closes the stream or the
//! transport fails. Failed sessions are retried on the [`ReconnectPolicy`]
//! schedule; a handshake resets the failure count. The server keeps no
//! subscription state, so every session resends the same ids and scope.

use crate::api::ApiClient;
use crate::error::{CliError, Result};
use crate::sse::{SseEvent, SseParser};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use registry_common::backoff::ReconnectPolicy;
use registry_common::types::{
    Channel, Handshake, ImportJobStatus, NotificationFrame, SubscriptionScope,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::ops::ControlFlow;
use tracing::{debug, info, warn};

/// Decoded status stream event
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Handshake(Handshake),
    Frame(NotificationFrame),
    Heartbeat(DateTime<Utc>),
}

enum SessionEnd {
    Stopped,
    Disconnected,
}

pub struct StatusWatcher {
    client: ApiClient,
    ids: Vec<i64>,
    scope: SubscriptionScope,
    policy: ReconnectPolicy,
}

impl StatusWatcher {
    pub fn new(client: ApiClient, ids: Vec<i64>, scope: SubscriptionScope) -> Self {
        Self {
            client,
            ids,
            scope,
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Deliver events to `on_event` until it breaks
    ///
    /// Client errors such as a rejected id list end the watch at once;
    /// transport failures and closed streams are retried.
    pub async fn run<F>(&self, mut on_event: F) -> Result<()>
    where
        F: FnMut(&WatchEvent) -> ControlFlow<()>,
    {
        let mut failures = 0u32;
        loop {
            match self.session(&mut on_event, &mut failures).await {
                Ok(SessionEnd::Stopped) => return Ok(()),
                Ok(SessionEnd::Disconnected) => warn!("Status stream closed by server"),
                Err(e) if e.is_transient() => warn!(error = %e, "Status stream failed"),
                Err(e) => return Err(e),
            }

            failures += 1;
            if !self.policy.should_retry(failures) {
                return Err(CliError::ReconnectExhausted { attempts: failures });
            }
            let delay = self.policy.delay_for(failures - 1);
            info!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to status stream"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn session<F>(&self, on_event: &mut F, failures: &mut u32) -> Result<SessionEnd>
    where
        F: FnMut(&WatchEvent) -> ControlFlow<()>,
    {
        let response = self.client.open_status_stream(&self.ids, self.scope).await?;
        let mut body = response.bytes_stream();
        let mut parser = SseParser::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for raw in parser.feed(&chunk) {
                let Some(event) = decode(&raw) else {
                    continue;
                };
                if let WatchEvent::Handshake(handshake) = &event {
                    debug!(
                        connection_id = handshake.connection_id,
                        retry_ms = raw.retry,
                        "Status stream handshake"
                    );
                    *failures = 0;
                }
                if on_event(&event).is_break() {
                    return Ok(SessionEnd::Stopped);
                }
            }
        }

        Ok(SessionEnd::Disconnected)
    }
}

#[derive(Deserialize)]
struct HeartbeatData {
    timestamp: DateTime<Utc>,
}

/// Decode a raw event; unknown names and malformed payloads are skipped
pub fn decode(raw: &SseEvent) -> Option<WatchEvent> {
    let decoded = match raw.event.as_str() {
        "handshake" => serde_json::from_str(&raw.data).map(WatchEvent::Handshake),
        "heartbeat" => serde_json::from_str::<HeartbeatData>(&raw.data)
            .map(|heartbeat| WatchEvent::Heartbeat(heartbeat.timestamp)),
        name if name.parse::<Channel>().is_ok() => {
            serde_json::from_str(&raw.data).map(WatchEvent::Frame)
        }
        name => {
            debug!(event = name, "Ignoring unknown stream event");
            return None;
        }
    };

    match decoded {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(event = %raw.event, error = %e, "Malformed stream event");
            None
        }
    }
}

/// Tracks which jobs have yet to reach a terminal status
#[derive(Debug, Clone)]
pub struct CompletionTracker {
    pending: HashSet<i64>,
}

impl CompletionTracker {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            pending: ids.into_iter().collect(),
        }
    }

    /// Record `frame`; true once every tracked job is finished
    pub fn observe(&mut self, frame: &NotificationFrame) -> bool {
        if frame.channel != Channel::ImportJob {
            return self.is_done();
        }
        let terminal = frame
            .entity
            .get("status")
            .and_then(|status| status.as_str())
            .and_then(|status| status.parse::<ImportJobStatus>().ok())
            .is_some_and(|status| status.is_terminal());
        if let (true, Some(id)) = (terminal, frame.id) {
            self.pending.remove(&id);
        }
        self.is_done()
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry_common::types::Verb;
    use serde_json::json;

    fn raw(event: &str, data: serde_json::Value) -> SseEvent {
        SseEvent {
            event: event.to_string(),
            data: data.to_string(),
            ..SseEvent::default()
        }
    }

    fn frame(id: i64, status: &str) -> NotificationFrame {
        NotificationFrame {
            channel: Channel::ImportJob,
            verb: Verb::Update,
            id: Some(id),
            entity: json!({ "id": id, "status": status }),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_decode_known_events() {
        let handshake = decode(&raw(
            "handshake",
            json!({
                "server_time": "2024-05-01T10:00:00Z",
                "connection_id": 7,
                "scope": "updates_for_ids_only",
                "ids": [1, 2]
            }),
        ));
        assert!(matches!(handshake, Some(WatchEvent::Handshake(h)) if h.connection_id == 7));

        let heartbeat = decode(&raw("heartbeat", json!({ "timestamp": "2024-05-01T10:00:15Z" })));
        assert!(matches!(heartbeat, Some(WatchEvent::Heartbeat(_))));

        let update = decode(&raw(
            "import_job",
            serde_json::to_value(frame(3, "loading")).unwrap(),
        ));
        assert!(matches!(update, Some(WatchEvent::Frame(f)) if f.id == Some(3)));
    }

    #[test]
    fn test_decode_skips_unknown_and_malformed() {
        assert!(decode(&raw("message", json!({}))).is_none());
        assert!(decode(&SseEvent {
            event: "import_job".to_string(),
            data: "not json".to_string(),
            ..SseEvent::default()
        })
        .is_none());
    }

    #[test]
    fn test_completion_tracker() {
        let mut tracker = CompletionTracker::new([1, 2]);
        assert!(!tracker.observe(&frame(1, "loading")));
        assert!(!tracker.observe(&frame(1, "data_load_completed")));
        assert!(!tracker.observe(&frame(9, "data_load_completed")));
        assert!(tracker.observe(&frame(2, "data_load_completed_partially")));
    }
}
