//! Publish-subscribe transport abstraction.
//!
//! The ledger publishes serialized events to a topic; the event processor
//! consumes them. Delivery is at-least-once; per-key ordering is not
//! required because the hash chain itself encodes the total order. The
//! in-process implementation is a bounded tokio channel per topic, so a
//! full queue back-pressures `log_event` instead of growing without bound.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use neuro_core::{NeuroError, NeuroResult};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Message transport between the ledger facade and the event processor.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Publish a message; resolves once the message is enqueued. Returns a
    /// transport-assigned message id.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> NeuroResult<String>;

    /// Subscribe to a topic. Creates the topic when it does not exist yet.
    fn subscribe(&self, topic: &str) -> ReceiverStream<Vec<u8>>;
}

/// Bounded in-process transport.
pub struct InProcessTransport {
    queue_depth: usize,
    topics: Mutex<BTreeMap<String, mpsc::Sender<Vec<u8>>>>,
    next_message_id: AtomicU64,
}

impl InProcessTransport {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            queue_depth: queue_depth.max(1),
            topics: Mutex::new(BTreeMap::new()),
            next_message_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl EventTransport for InProcessTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> NeuroResult<String> {
        let sender = self
            .topics
            .lock()
            .get(topic)
            .cloned()
            .ok_or_else(|| NeuroError::Ledger(format!("topic '{}' has no subscriber", topic)))?;

        // Bounded send: blocks when the processor is behind.
        sender
            .send(payload)
            .await
            .map_err(|_| NeuroError::Ledger(format!("topic '{}' subscriber dropped", topic)))?;

        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        Ok(id.to_string())
    }

    fn subscribe(&self, topic: &str) -> ReceiverStream<Vec<u8>> {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        self.topics.lock().insert(topic.to_string(), tx);
        ReceiverStream::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let transport = InProcessTransport::new(8);
        let mut stream = transport.subscribe("ledger-events");

        let id1 = transport
            .publish("ledger-events", b"one".to_vec())
            .await
            .unwrap();
        let id2 = transport
            .publish("ledger-events", b"two".to_vec())
            .await
            .unwrap();
        assert_ne!(id1, id2);

        assert_eq!(stream.next().await.unwrap(), b"one");
        assert_eq!(stream.next().await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn publish_without_subscriber_fails() {
        let transport = InProcessTransport::new(8);
        assert!(transport
            .publish("nowhere", b"lost".to_vec())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn bounded_queue_applies_backpressure() {
        let transport = InProcessTransport::new(1);
        let mut stream = transport.subscribe("t");

        transport.publish("t", b"a".to_vec()).await.unwrap();
        // Queue full: the next publish must not complete until a message is
        // drained.
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            transport.publish("t", b"b".to_vec()),
        )
        .await;
        assert!(pending.is_err(), "publish blocked on full queue");

        assert_eq!(stream.next().await.unwrap(), b"a");
        transport.publish("t", b"b".to_vec()).await.unwrap();
        assert_eq!(stream.next().await.unwrap(), b"b");
    }
}
