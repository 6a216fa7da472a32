//! Topic router: explicit subscriber sets and fan-out.
//!
//! Each subscriber is reached through an [`OutboundSink`], a bounded queue
//! drained by that connection's own task. Publishing only ever does a
//! non-blocking hand-off into those queues, so a stalled client costs the
//! publisher a failed `try_send` and nothing more.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::session::ConnectionId;

/// Text published to a topic, shared between every subscriber queue.
pub type Payload = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("outbound queue is full")]
    QueueFull,
    #[error("outbound queue is closed")]
    Closed,
}

/// Sending half of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundSink {
    tx: mpsc::Sender<Payload>,
}

impl OutboundSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    fn deliver(&self, payload: &Payload) -> Result<(), DeliveryError> {
        self.tx
            .try_send(Arc::clone(payload))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }
}

/// Outcome of one publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: String,
    pub delivered: Vec<ConnectionId>,
    pub failures: Vec<(ConnectionId, DeliveryError)>,
}

impl DeliveryReport {
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TopicRouter {
    // BTreeMap keeps fan-out order stable, which keeps logs and tests readable.
    topics: RwLock<HashMap<String, BTreeMap<ConnectionId, OutboundSink>>>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the connection to `topic`. Returns `false` if it was already
    /// subscribed, in which case the existing sink is kept.
    pub async fn subscribe(&self, topic: &str, id: ConnectionId, sink: OutboundSink) -> bool {
        let mut topics = self.topics.write().await;
        let subscribers = topics.entry(topic.to_string()).or_default();
        if subscribers.contains_key(&id) {
            return false;
        }
        subscribers.insert(id, sink);
        debug!(topic, connection = %id, "subscribed");
        true
    }

    /// Removes the connection from `topic`. Returns `false` if it was not
    /// subscribed.
    pub async fn unsubscribe(&self, topic: &str, id: ConnectionId) -> bool {
        let mut topics = self.topics.write().await;
        let Some(subscribers) = topics.get_mut(topic) else {
            return false;
        };

        let removed = subscribers.remove(&id).is_some();
        if subscribers.is_empty() {
            topics.remove(topic);
        }
        if removed {
            debug!(topic, connection = %id, "unsubscribed");
        }
        removed
    }

    /// Removes the connection from every topic, returning how many it left.
    pub async fn unsubscribe_all(&self, id: ConnectionId) -> usize {
        let mut topics = self.topics.write().await;
        let mut left = 0;
        topics.retain(|_, subscribers| {
            if subscribers.remove(&id).is_some() {
                left += 1;
            }
            !subscribers.is_empty()
        });
        left
    }

    /// Fans `payload` out to the subscribers of `topic`.
    ///
    /// The read lock is held for the whole iteration, so the subscriber set
    /// cannot change mid-publish: anyone subscribing or unsubscribing waits
    /// for it to finish. Failed hand-offs are collected in the report.
    pub async fn publish(&self, topic: &str, payload: Payload) -> DeliveryReport {
        let topics = self.topics.read().await;
        let mut report = DeliveryReport {
            topic: topic.to_string(),
            ..DeliveryReport::default()
        };

        let Some(subscribers) = topics.get(topic) else {
            return report;
        };

        for (id, sink) in subscribers {
            match sink.deliver(&payload) {
                Ok(()) => report.delivered.push(*id),
                Err(err) => report.failures.push((*id, err)),
            }
        }
        drop(topics);

        if !report.is_clean() {
            warn!(
                topic,
                delivered = report.delivered_count(),
                failed = report.failed_count(),
                "publish could not reach every subscriber"
            );
        }
        report
    }

    /// Current subscribers of `topic`, in id order.
    pub async fn subscribers(&self, topic: &str) -> Vec<ConnectionId> {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|subscribers| subscribers.keys().copied().collect())
            .unwrap_or_default()
    }

    pub async fn is_subscribed(&self, topic: &str, id: ConnectionId) -> bool {
        self.topics
            .read()
            .await
            .get(topic)
            .is_some_and(|subscribers| subscribers.contains_key(&id))
    }
}
