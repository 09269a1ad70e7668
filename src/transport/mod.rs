//! Broker seams for the relay pipeline
//!
//! Two roles are modelled:
//! - `PubSubBus`: live, non-persistent topic stream the collector subscribes to
//! - `DurableQueue`: broker-persisted point-to-point queue carrying daily aggregates
//!
//! Production adapters live in `mqtt` (rumqttc) and `amqp` (lapin). The `memory`
//! adapters implement the same traits in-process for tests and dry runs.

pub mod amqp;
pub mod backoff;
pub mod memory;
pub mod mqtt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use amqp::AmqpQueue;
pub use backoff::{ExponentialBackoff, MaxRetriesExceeded};
pub use memory::{MemoryBus, MemoryQueue};
pub use mqtt::MqttBus;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Subscribe error: {0}")]
    Subscribe(String),

    #[error("Declare error: {0}")]
    Declare(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Retrieve error: {0}")]
    Retrieve(String),

    #[error("Acknowledge error: {0}")]
    Acknowledge(String),
}

/// Live subscription handle
///
/// The producer side (broker event loop) writes raw payloads into a bounded
/// channel; the holder of this handle is the single reader. The release token
/// is cancelled on `close()` and on drop, which tells the producer to
/// unsubscribe and let go of the broker connection.
pub struct Subscription {
    topic: String,
    payloads: mpsc::Receiver<Vec<u8>>,
    release: CancellationToken,
}

impl Subscription {
    pub fn new(
        topic: impl Into<String>,
        payloads: mpsc::Receiver<Vec<u8>>,
        release: CancellationToken,
    ) -> Self {
        Self {
            topic: topic.into(),
            payloads,
            release,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next payload. `None` once the producer has gone away.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.payloads.recv().await
    }

    /// Payload already queued before `close()`, if any
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.payloads.try_recv().ok()
    }

    /// Stop accepting payloads and release the broker subscription.
    ///
    /// Payloads the producer queued before this call stay readable through
    /// `try_recv`; nothing sent afterwards is accepted.
    pub fn close(&mut self) {
        self.payloads.close();
        self.release.cancel();
    }

    pub fn is_released(&self) -> bool {
        self.release.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release.cancel();
    }
}

/// Topic-based live stream (MQTT in production)
#[async_trait]
pub trait PubSubBus: Send + Sync {
    /// Subscribe to a topic. The returned handle owns the subscription.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// Message retrieved from a durable queue, not yet acknowledged
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: u64,
    pub payload: Vec<u8>,
    pub redelivered: bool,
}

/// Broker-persisted queue (AMQP in production)
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Declare a durable queue. Safe to call repeatedly.
    async fn declare(&self, queue: &str) -> Result<(), TransportError>;

    /// Publish a payload with persistent delivery, tagged with `message_id`.
    /// Does not wait for a broker confirm.
    async fn publish_persistent(
        &self,
        queue: &str,
        message_id: &str,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Single non-blocking retrieval. `Ok(None)` when the queue is empty.
    async fn get(&self, queue: &str) -> Result<Option<Delivery>, TransportError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Drop a delivery without requeueing it
    async fn reject(&self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}
