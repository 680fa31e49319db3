//! Event bus seam for `roastd`.
//!
//! The fabric consumes broker events through the [`EventBus`] trait so the
//! dispatcher never touches a concrete client. Two backends exist:
//!
//! - [`MqttBus`] — the production backend over `rumqttc`, speaking MQTT
//!   topic filters (`+` per segment, `#` for the rest).
//! - [`MemoryBus`] — an in-process bus with the same wildcard semantics,
//!   for tests and single-process development.
//!
//! Delivery is level best-effort: subscribers receive messages through a
//! bounded channel, and a subscriber that cannot keep up loses messages
//! rather than blocking the broker callback.

pub mod memory;
pub mod mqtt;
pub mod topic;

pub use memory::MemoryBus;
pub use mqtt::MqttBus;
pub use topic::topic_matches;

use tokio::sync::mpsc;

/// Per-subscriber channel capacity. A subscriber this far behind starts
/// losing messages (counted and logged, never blocking the broker).
pub const SUBSCRIBER_BUFFER: usize = 256;

/// A raw message off the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Errors from bus backends.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Could not reach or parse the broker address.
    #[error("bus connection error: {reason}")]
    Connection { reason: String },

    /// Subscription was rejected.
    #[error("bus subscribe error: {reason}")]
    Subscribe { reason: String },

    /// Publish was rejected.
    #[error("bus publish error: {reason}")]
    Publish { reason: String },
}

/// The subscribe/publish contract the fabric consumes.
#[async_trait::async_trait]
pub trait EventBus: Send + Sync {
    /// Subscribe to a set of topic filters. Messages matching any filter
    /// arrive on the returned channel in receipt order.
    async fn subscribe(&self, topics: &[String]) -> Result<mpsc::Receiver<BusMessage>, BusError>;

    /// Publish a payload to a literal topic.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;
}
