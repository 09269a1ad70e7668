//! Stream collector - bounded-time subscription to the readings topic
//!
//! Subscribes, buffers every well-formed reading for one collection window,
//! and closes the window on timeout, cancellation or source shutdown. The
//! subscription is released on every exit path: explicitly on close, and by
//! `Subscription::drop` if the collect future itself is dropped.

use super::error::PipelineError;
use super::types::Reading;
use super::window::{CloseReason, CollectionWindow, WindowReport};
use crate::transport::{PubSubBus, Subscription, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Cadence of the "seconds remaining" progress line
const PROGRESS_TICK: Duration = Duration::from_secs(5);

pub struct StreamCollector {
    bus: Arc<dyn PubSubBus>,
    progress_every: usize,
}

impl StreamCollector {
    pub fn new(bus: Arc<dyn PubSubBus>, progress_every: usize) -> Self {
        Self {
            bus,
            progress_every: progress_every.max(1),
        }
    }

    /// Collect readings from `topic` for `duration`
    ///
    /// Returns the window contents in arrival order. Zero readings is an
    /// empty report, not an error. Cancellation returns what was collected
    /// so far, even while still subscribing. Only subscribe failures are
    /// errors: retries exhausted, or no subscription before `duration` ends.
    pub async fn collect(
        &self,
        topic: &str,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<WindowReport, PipelineError> {
        let deadline = Instant::now() + duration;
        let timer = sleep_until(deadline);
        tokio::pin!(timer);

        // Subscribe retries count against the window
        let mut subscription = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                log::warn!("⚠️  Cancelled before '{}' was subscribed", topic);
                return Ok(CollectionWindow::open(duration).close(CloseReason::Cancelled));
            }

            _ = &mut timer => {
                return Err(TransportError::Subscribe(format!(
                    "no subscription on '{}' within {}s",
                    topic,
                    duration.as_secs()
                ))
                .into());
            }

            subscribed = self.bus.subscribe(topic) => subscribed?,
        };

        let mut window = CollectionWindow::open(duration);

        log::info!("📡 Collection window opened on '{}'", subscription.topic());
        log::info!("   ├─ Backend: {}", self.bus.backend_type());
        log::info!("   └─ Duration: {}s", window.duration().as_secs());

        let mut ticker = interval_at(Instant::now() + PROGRESS_TICK, PROGRESS_TICK);

        let reason = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break CloseReason::Cancelled,

                _ = &mut timer => break CloseReason::Timeout,

                payload = subscription.recv() => match payload {
                    Some(payload) => self.accept(&mut window, &payload),
                    None => break CloseReason::SourceEnded,
                },

                _ = ticker.tick() => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    log::info!(
                        "⏳ {}s remaining ({} readings, {} malformed)",
                        remaining.as_secs(),
                        window.len(),
                        window.malformed()
                    );
                }
            }
        };

        let report = self.close_window(window, &mut subscription, reason);

        log::info!("🛑 Collection window closed ({})", report.close_reason);
        log::info!("   ├─ Readings: {}", report.readings.len());
        log::info!("   ├─ Malformed: {}", report.malformed);
        log::info!("   └─ Elapsed: {}s", report.elapsed().num_seconds());

        Ok(report)
    }

    fn accept(&self, window: &mut CollectionWindow, payload: &[u8]) {
        match Reading::from_payload(payload) {
            Ok(reading) => {
                window.push(reading);
                if window.len() % self.progress_every == 0 {
                    log::info!("📊 Collected {} readings", window.len());
                }
            }
            Err(e) => {
                window.record_malformed();
                log::debug!("Dropped payload: {}", e);
            }
        }
    }

    /// Stop the producer, keep what it queued before the close, then seal the window
    fn close_window(
        &self,
        mut window: CollectionWindow,
        subscription: &mut Subscription,
        reason: CloseReason,
    ) -> WindowReport {
        subscription.close();
        while let Some(payload) = subscription.try_recv() {
            self.accept(&mut window, &payload);
        }
        window.close(reason)
    }
}
