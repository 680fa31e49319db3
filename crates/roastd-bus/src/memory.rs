//! In-memory event bus for tests and single-process development.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::topic::topic_matches;
use crate::{BusError, BusMessage, EventBus, SUBSCRIBER_BUFFER};

struct Subscriber {
    filters: Vec<String>,
    tx: mpsc::Sender<BusMessage>,
}

/// An in-process bus with MQTT wildcard semantics.
#[derive(Clone, Default)]
pub struct MemoryBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EventBus for MemoryBus {
    async fn subscribe(&self, topics: &[String]) -> Result<mpsc::Receiver<BusMessage>, BusError> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.lock().await.push(Subscriber {
            filters: topics.to_vec(),
            tx,
        });
        Ok(rx)
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|s| !s.tx.is_closed());

        for subscriber in subscribers.iter() {
            if !subscriber.filters.iter().any(|f| topic_matches(f, topic)) {
                continue;
            }
            let message = BusMessage {
                topic: topic.to_owned(),
                payload: payload.to_vec(),
            };
            if subscriber.tx.try_send(message).is_err() {
                warn!(topic = %topic, "memory bus subscriber lagging; message dropped");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBus").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_matching_messages_in_order() {
        let bus = MemoryBus::new();
        let mut rx = bus
            .subscribe(&["ops/+/+/+/session/closed".to_owned()])
            .await
            .unwrap();

        bus.publish("ops/o/s/m/session/closed", b"one").await.unwrap();
        bus.publish("roaster/o/s/m/telemetry", b"ignored").await.unwrap();
        bus.publish("ops/o/s/m/session/closed", b"two").await.unwrap();

        assert_eq!(rx.recv().await.unwrap().payload, b"one");
        assert_eq!(rx.recv().await.unwrap().payload, b"two");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_a_copy() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe(&["ops/#".to_owned()]).await.unwrap();
        let mut b = bus.subscribe(&["ops/#".to_owned()]).await.unwrap();

        bus.publish("ops/x", b"payload").await.unwrap();

        assert_eq!(a.recv().await.unwrap().payload, b"payload");
        assert_eq!(b.recv().await.unwrap().payload, b"payload");
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned() {
        let bus = MemoryBus::new();
        let rx = bus.subscribe(&["ops/#".to_owned()]).await.unwrap();
        drop(rx);

        bus.publish("ops/x", b"payload").await.unwrap();
        assert!(bus.subscribers.lock().await.is_empty());
    }
}
