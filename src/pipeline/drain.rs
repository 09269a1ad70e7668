//! Bounded drain consumer
//!
//! Pulls whatever daily aggregates are currently on the durable queue within
//! a wall-clock budget, acknowledging each one as it is parsed. Never blocks
//! past the budget; returns early once the queue has been empty for a few
//! consecutive polls.

use super::clock::Clock;
use super::config::PipelineConfig;
use super::types::RelayMessage;
use crate::transport::{Delivery, DurableQueue};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a drain stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStop {
    BudgetExhausted,
    QueueEmpty,
    Cancelled,
    /// A transport error ended retrieval; results up to that point are kept
    Interrupted,
}

impl fmt::Display for DrainStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DrainStop::BudgetExhausted => "budget exhausted",
            DrainStop::QueueEmpty => "queue empty",
            DrainStop::Cancelled => "cancelled",
            DrainStop::Interrupted => "interrupted",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct DrainReport {
    /// Parsed messages in retrieval order (not de-duplicated)
    pub messages: Vec<RelayMessage>,
    pub malformed: usize,
    pub stop: DrainStop,
    pub elapsed: Duration,
}

/// Drain settings
#[derive(Debug, Clone, Copy)]
pub struct DrainSettings {
    /// Wait after an empty poll
    pub backoff: Duration,
    /// Consecutive empty polls that end the drain; 0 polls until the budget is spent
    pub idle_polls: u32,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(200),
            idle_polls: 3,
        }
    }
}

impl From<&PipelineConfig> for DrainSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            backoff: config.drain_backoff,
            idle_polls: config.drain_idle_polls,
        }
    }
}

pub struct DrainConsumer {
    settings: DrainSettings,
    clock: Arc<dyn Clock>,
}

enum Settled {
    Kept,
    Dropped,
}

impl DrainConsumer {
    pub fn new(settings: DrainSettings, clock: Arc<dyn Clock>) -> Self {
        Self { settings, clock }
    }

    /// Drain `queue_name` for at most `budget`
    pub async fn drain(
        &self,
        queue: &dyn DurableQueue,
        queue_name: &str,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> DrainReport {
        let started = self.clock.elapsed();
        let mut messages = Vec::new();
        let mut malformed = 0usize;
        let mut idle = 0u32;

        log::info!("📥 Draining '{}' via {}", queue_name, queue.backend_type());
        log::info!("   ├─ Budget: {:?}", budget);
        log::info!(
            "   └─ Backoff: {:?}, idle polls: {}",
            self.settings.backoff,
            self.settings.idle_polls
        );

        let stop = loop {
            if cancel.is_cancelled() {
                break DrainStop::Cancelled;
            }
            let spent = self.clock.elapsed().saturating_sub(started);
            let Some(remaining) = budget.checked_sub(spent).filter(|r| !r.is_zero()) else {
                break DrainStop::BudgetExhausted;
            };

            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break DrainStop::Cancelled,
                result = queue.get(queue_name) => result,
                _ = self.clock.sleep(remaining) => break DrainStop::BudgetExhausted,
            };

            let delivery = match polled {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    idle += 1;
                    if self.settings.idle_polls > 0 && idle >= self.settings.idle_polls {
                        break DrainStop::QueueEmpty;
                    }
                    let wait = self.settings.backoff.min(remaining);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break DrainStop::Cancelled,
                        _ = self.clock.sleep(wait) => continue,
                    }
                }
                Err(e) => {
                    log::warn!("⚠️  Retrieval from '{}' failed: {}", queue_name, e);
                    break DrainStop::Interrupted;
                }
            };

            idle = 0;
            match self.settle(queue, delivery, &mut messages).await {
                Ok(Settled::Kept) => {}
                Ok(Settled::Dropped) => malformed += 1,
                Err(e) => {
                    log::warn!("⚠️  Settling delivery on '{}' failed: {}", queue_name, e);
                    break DrainStop::Interrupted;
                }
            }
        };

        let elapsed = self.clock.elapsed().saturating_sub(started);

        log::info!("📥 Drain finished ({})", stop);
        log::info!("   ├─ Messages: {}", messages.len());
        log::info!("   ├─ Malformed: {}", malformed);
        log::info!("   └─ Elapsed: {:?}", elapsed);

        DrainReport {
            messages,
            malformed,
            stop,
            elapsed,
        }
    }

    async fn settle(
        &self,
        queue: &dyn DurableQueue,
        delivery: Delivery,
        messages: &mut Vec<RelayMessage>,
    ) -> Result<Settled, crate::transport::TransportError> {
        match RelayMessage::from_payload(&delivery.payload) {
            Ok(message) => {
                if delivery.redelivered {
                    log::debug!("Redelivered message for ts={}", message.ts);
                }
                messages.push(message);
                queue.ack(&delivery).await?;
                Ok(Settled::Kept)
            }
            Err(e) => {
                log::debug!("Rejecting malformed delivery {}: {}", delivery.tag, e);
                queue.reject(&delivery).await?;
                Ok(Settled::Dropped)
            }
        }
    }
}

/// De-duplicate by UTC day (last write wins) and order by `ts`
pub fn merge_by_day(messages: &[RelayMessage]) -> Vec<RelayMessage> {
    let mut by_day: BTreeMap<i64, RelayMessage> = BTreeMap::new();
    for message in messages {
        by_day.insert(message.day_key(), *message);
    }

    let mut merged: Vec<RelayMessage> = by_day.into_values().collect();
    merged.sort_by_key(|m| m.ts);
    merged
}
