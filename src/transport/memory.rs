//! In-process bus and queue
//!
//! Same contracts as the MQTT/AMQP adapters, without a broker. Used by the
//! test suites and for local dry runs of the pipeline.

use super::{Delivery, DurableQueue, PubSubBus, Subscription, TransportError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Subscriber {
    tx: mpsc::Sender<Vec<u8>>,
    release: CancellationToken,
}

impl Subscriber {
    fn is_live(&self) -> bool {
        !self.release.is_cancelled() && !self.tx.is_closed()
    }
}

/// Fan-out topic bus. Like MQTT QoS 0, payloads published while nobody is
/// subscribed (or while a subscriber's buffer is full) are lost.
pub struct MemoryBus {
    topics: Mutex<HashMap<String, Vec<Subscriber>>>,
    channel_capacity: usize,
}

impl MemoryBus {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            channel_capacity,
        }
    }

    /// Publish a payload to every live subscriber of `topic`.
    ///
    /// Returns the number of subscribers that accepted it.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        let payload = payload.into();
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let Some(subscribers) = topics.get_mut(topic) else {
            return 0;
        };

        subscribers.retain(Subscriber::is_live);

        subscribers
            .iter()
            .filter(|s| s.tx.try_send(payload.clone()).is_ok())
            .count()
    }

    /// Number of subscriptions on `topic` that have not been released
    pub fn active_subscriptions(&self, topic: &str) -> usize {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .get(topic)
            .map(|subs| subs.iter().filter(|s| s.is_live()).count())
            .unwrap_or(0)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl PubSubBus for MemoryBus {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let release = CancellationToken::new();

        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.entry(topic.to_string()).or_default().push(Subscriber {
            tx,
            release: release.clone(),
        });

        Ok(Subscription::new(topic, rx, release))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

/// Message as stored by `MemoryQueue`
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message_id: Option<String>,
    pub payload: Vec<u8>,
    pub persistent: bool,
    pub redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<QueuedMessage>,
    unacked: HashMap<u64, QueuedMessage>,
}

/// FIFO durable-queue stand-in with AMQP-style get/ack/reject semantics
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    next_tag: AtomicU64,
    publish_budget: Mutex<Option<usize>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            next_tag: AtomicU64::new(1),
            publish_budget: Mutex::new(None),
        }
    }

    /// Make every publish after the first `n` fail
    pub fn fail_publishes_after(&self, n: usize) {
        *self.publish_budget.lock().unwrap_or_else(|e| e.into_inner()) = Some(n);
    }

    /// Enqueue a raw payload directly, bypassing `declare`
    pub fn push_raw(&self, queue: &str, payload: impl Into<Vec<u8>>) {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(QueuedMessage {
                message_id: None,
                payload: payload.into(),
                persistent: false,
                redelivered: false,
            });
    }

    pub fn is_declared(&self, queue: &str) -> bool {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.contains_key(queue)
    }

    /// Messages waiting for delivery
    pub fn ready_len(&self, queue: &str) -> usize {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.get(queue).map(|q| q.ready.len()).unwrap_or(0)
    }

    /// Delivered but neither acked nor rejected
    pub fn unacked_len(&self, queue: &str) -> usize {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.get(queue).map(|q| q.unacked.len()).unwrap_or(0)
    }

    /// Snapshot of the ready messages, head first
    pub fn ready_messages(&self, queue: &str) -> Vec<QueuedMessage> {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues
            .get(queue)
            .map(|q| q.ready.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Return every unacked delivery to the head of the queue, flagged as
    /// redelivered. Mirrors a consumer channel closing mid-flight.
    pub fn recover(&self, queue: &str) {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = queues.get_mut(queue) {
            let mut pending: Vec<_> = state.unacked.drain().collect();
            pending.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));
            for (_, mut message) in pending {
                message.redelivered = true;
                state.ready.push_front(message);
            }
        }
    }

    fn take_publish_permit(&self) -> bool {
        let mut budget = self.publish_budget.lock().unwrap_or_else(|e| e.into_inner());
        match budget.as_mut() {
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
            None => true,
        }
    }

    fn settle(&self, delivery: &Delivery) -> Result<(), TransportError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let settled = queues
            .values_mut()
            .any(|state| state.unacked.remove(&delivery.tag).is_some());

        if settled {
            Ok(())
        } else {
            Err(TransportError::Acknowledge(format!(
                "unknown delivery tag {}",
                delivery.tag
            )))
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn declare(&self, queue: &str) -> Result<(), TransportError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish_persistent(
        &self,
        queue: &str,
        message_id: &str,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        if !self.take_publish_permit() {
            return Err(TransportError::Publish("channel closed".to_string()));
        }

        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::Publish(format!("queue '{}' not declared", queue)))?;

        state.ready.push_back(QueuedMessage {
            message_id: Some(message_id.to_string()),
            payload: payload.to_vec(),
            persistent: true,
            redelivered: false,
        });
        Ok(())
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>, TransportError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::Retrieve(format!("no queue '{}'", queue)))?;

        let Some(message) = state.ready.pop_front() else {
            return Ok(None);
        };

        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        let delivery = Delivery {
            tag,
            payload: message.payload.clone(),
            redelivered: message.redelivered,
        };
        state.unacked.insert(tag, message);
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.settle(delivery)
    }

    async fn reject(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.settle(delivery)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
