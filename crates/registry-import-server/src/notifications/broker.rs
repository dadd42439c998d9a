//! Notification broker
//!
//! Maps live status-stream connections to their bounded outboxes. The
//! listener publishes into the broker; each connection handler owns a
//! [`Subscription`] and drains its outbox.
//!
//! ```text
//! PgListener -> Broker::publish -> filter per connection -> try_send -> outbox -> SSE
//! ```
//!
//! Delivery never blocks: a full outbox counts as a failed send, and a
//! connection is closed after `max_failed_sends` consecutive failures.
//! Dropping a [`Subscription`] removes its entry immediately.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use registry_common::types::{Channel, NotificationFrame, SubscriptionScope, Verb};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Message queued for one connection
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(NotificationFrame),
    Heartbeat(DateTime<Utc>),
}

/// Which frames a connection wants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub scope: SubscriptionScope,
    pub ids: HashSet<i64>,
}

impl Filter {
    pub fn new(scope: SubscriptionScope, ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            scope,
            ids: ids.into_iter().collect(),
        }
    }

    /// Worker status frames carry no entity id and go to every connection.
    pub fn accepts(&self, frame: &NotificationFrame) -> bool {
        if frame.channel == Channel::WorkerStatus {
            return true;
        }
        let tracked = frame.id.is_some_and(|id| self.ids.contains(&id));
        match self.scope {
            SubscriptionScope::UpdatesForIdsOnly => tracked,
            SubscriptionScope::UpdatesAndAllInserts => tracked || frame.verb == Verb::Insert,
        }
    }
}

struct Subscriber {
    filter: Filter,
    outbox: mpsc::Sender<Outbound>,
    failed_sends: AtomicU32,
}

struct BrokerInner {
    next_id: AtomicU64,
    subscribers: DashMap<u64, Arc<Subscriber>>,
    outbox_capacity: usize,
    max_failed_sends: u32,
}

#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn new(outbox_capacity: usize, max_failed_sends: u32) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                next_id: AtomicU64::new(1),
                subscribers: DashMap::new(),
                outbox_capacity: outbox_capacity.max(1),
                max_failed_sends: max_failed_sends.max(1),
            }),
        }
    }

    /// Register a connection and hand back its outbox
    pub fn subscribe(&self, filter: Filter) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.outbox_capacity);
        self.inner.subscribers.insert(
            id,
            Arc::new(Subscriber {
                filter,
                outbox: tx,
                failed_sends: AtomicU32::new(0),
            }),
        );
        info!(connection_id = id, "Status stream opened");

        Subscription {
            id,
            outbox: rx,
            broker: self.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Deliver a frame to every connection whose filter accepts it
    ///
    /// Returns the number of connections the frame was queued for.
    pub fn publish(&self, frame: &NotificationFrame) -> usize {
        let targets: Vec<(u64, Arc<Subscriber>)> = self
            .snapshot()
            .into_iter()
            .filter(|(_, subscriber)| subscriber.filter.accepts(frame))
            .collect();

        targets
            .into_iter()
            .filter(|(id, subscriber)| self.deliver(*id, subscriber, Outbound::Frame(frame.clone())))
            .count()
    }

    /// Queue a heartbeat on every connection
    pub fn heartbeat(&self) {
        let now = Utc::now();
        for (id, subscriber) in self.snapshot() {
            self.deliver(id, &subscriber, Outbound::Heartbeat(now));
        }
    }

    /// Push heartbeats on a fixed interval until shutdown
    pub fn start_heartbeat(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let broker = self.clone();
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Status stream heartbeat started");
            let mut timer = tokio::time::interval(interval);
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = timer.tick() => broker.heartbeat(),
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }
            }
            info!("Status stream heartbeat stopped");
        })
    }

    /// Copy of the registry so sends happen outside the map's shard locks
    fn snapshot(&self) -> Vec<(u64, Arc<Subscriber>)> {
        self.inner
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    fn deliver(&self, id: u64, subscriber: &Subscriber, message: Outbound) -> bool {
        match subscriber.outbox.try_send(message) {
            Ok(()) => {
                subscriber.failed_sends.store(0, Ordering::Relaxed);
                true
            },
            Err(mpsc::error::TrySendError::Full(_)) => {
                let failed = subscriber.failed_sends.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(connection_id = id, failed, "Status stream outbox full");
                if failed >= self.inner.max_failed_sends {
                    info!(connection_id = id, failed, "Closing unresponsive status stream");
                    self.unsubscribe(id);
                }
                false
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.unsubscribe(id);
                false
            },
        }
    }

    fn unsubscribe(&self, id: u64) {
        if self.inner.subscribers.remove(&id).is_some() {
            info!(connection_id = id, "Status stream closed");
        }
    }
}

/// A registered connection
///
/// The outbox closes once the broker drops the connection; dropping the
/// subscription removes it from the broker.
pub struct Subscription {
    id: u64,
    outbox: mpsc::Receiver<Outbound>,
    broker: Broker,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbox.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(verb: Verb, id: i64) -> NotificationFrame {
        NotificationFrame {
            channel: Channel::ImportJob,
            verb,
            id: Some(id),
            entity: json!({ "id": id }),
            timestamp: Utc::now(),
        }
    }

    fn drain(subscription: &mut Subscription) -> Vec<Outbound> {
        let mut received = Vec::new();
        while let Ok(message) = subscription.outbox.try_recv() {
            received.push(message);
        }
        received
    }

    fn frame_ids(messages: &[Outbound]) -> Vec<(Verb, i64)> {
        messages
            .iter()
            .filter_map(|m| match m {
                Outbound::Frame(f) => Some((f.verb, f.id.unwrap_or_default())),
                Outbound::Heartbeat(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_ids_only_scope_filters_untracked_ids() {
        let broker = Broker::new(16, 3);
        let mut sub = broker.subscribe(Filter::new(SubscriptionScope::UpdatesForIdsOnly, [5]));

        broker.publish(&frame(Verb::Insert, 5));
        broker.publish(&frame(Verb::Update, 5));
        broker.publish(&frame(Verb::Insert, 7));
        broker.publish(&frame(Verb::Update, 7));

        assert_eq!(
            frame_ids(&drain(&mut sub)),
            vec![(Verb::Insert, 5), (Verb::Update, 5)]
        );
    }

    #[test]
    fn test_all_inserts_scope_accepts_untracked_inserts() {
        let broker = Broker::new(16, 3);
        let mut sub = broker.subscribe(Filter::new(SubscriptionScope::UpdatesAndAllInserts, [5]));

        broker.publish(&frame(Verb::Insert, 9));
        broker.publish(&frame(Verb::Update, 9));
        broker.publish(&frame(Verb::Delete, 5));

        assert_eq!(
            frame_ids(&drain(&mut sub)),
            vec![(Verb::Insert, 9), (Verb::Delete, 5)]
        );
    }

    #[test]
    fn test_worker_status_reaches_every_connection() {
        let broker = Broker::new(16, 3);
        let mut sub = broker.subscribe(Filter::new(SubscriptionScope::UpdatesForIdsOnly, []));

        let delivered = broker.publish(&NotificationFrame {
            channel: Channel::WorkerStatus,
            verb: Verb::Update,
            id: None,
            entity: json!({ "type": "import", "status": true }),
            timestamp: Utc::now(),
        });

        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut sub).len(), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let broker = Broker::new(16, 3);
        let sub = broker.subscribe(Filter::new(SubscriptionScope::UpdatesForIdsOnly, [1]));
        assert_eq!(broker.subscriber_count(), 1);

        drop(sub);
        assert_eq!(broker.subscriber_count(), 0);
        assert_eq!(broker.publish(&frame(Verb::Update, 1)), 0);
    }

    #[test]
    fn test_stalled_connection_closed_after_consecutive_failures() {
        let broker = Broker::new(1, 3);
        let mut stalled = broker.subscribe(Filter::new(SubscriptionScope::UpdatesForIdsOnly, [1]));
        let mut healthy = broker.subscribe(Filter::new(SubscriptionScope::UpdatesForIdsOnly, [1]));

        // first send fills the outbox of capacity 1
        broker.publish(&frame(Verb::Update, 1));
        drain(&mut healthy);
        for _ in 0..3 {
            broker.publish(&frame(Verb::Update, 1));
            drain(&mut healthy);
        }

        assert_eq!(broker.subscriber_count(), 1);
        // the queued frame is still readable, then the outbox reports closed
        assert!(stalled.outbox.try_recv().is_ok());
        assert!(matches!(
            stalled.outbox.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_successful_send_resets_failure_count() {
        let broker = Broker::new(1, 2);
        let mut sub = broker.subscribe(Filter::new(SubscriptionScope::UpdatesForIdsOnly, [1]));

        broker.publish(&frame(Verb::Update, 1));
        broker.publish(&frame(Verb::Update, 1)); // fails once
        drain(&mut sub);
        broker.publish(&frame(Verb::Update, 1)); // succeeds, resets
        broker.publish(&frame(Verb::Update, 1)); // fails once

        assert_eq!(broker.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_is_queued() {
        let broker = Broker::new(4, 3);
        let mut sub = broker.subscribe(Filter::new(SubscriptionScope::UpdatesForIdsOnly, []));

        broker.heartbeat();
        assert!(matches!(sub.recv().await, Some(Outbound::Heartbeat(_))));
    }
}
