//! Pipeline runner - drives collect → clean → publish cycles
//!
//! One cycle walks the run state machine:
//!
//! ```text
//! Idle → Collecting → Cleaning → Publishing → Done
//!            └── (no readings) ──→ Idle
//! any non-terminal state ── fatal error ──→ Failed
//! ```
//!
//! `Done` goes back to `Idle` when the runner is configured to keep cycling.
//! `Failed` is terminal: the runner refuses further cycles.

use super::cleaner::clean_and_aggregate;
use super::collector::StreamCollector;
use super::config::PipelineConfig;
use super::error::PipelineError;
use super::relay::publish_aggregates;
use super::window::CloseReason;
use crate::transport::{DurableQueue, PubSubBus};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Collecting,
    Cleaning,
    Publishing,
    Done,
    Failed,
}

impl RunState {
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Failed, _) => false,
            (_, Failed) => true,
            (Idle, Collecting)
            | (Collecting, Cleaning)
            | (Collecting, Idle)
            | (Cleaning, Publishing)
            | (Publishing, Done)
            | (Done, Idle) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == RunState::Failed
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Idle => "Idle",
            RunState::Collecting => "Collecting",
            RunState::Cleaning => "Cleaning",
            RunState::Publishing => "Publishing",
            RunState::Done => "Done",
            RunState::Failed => "Failed",
        };
        f.write_str(label)
    }
}

/// Outcome of a single cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleResult {
    Published {
        readings: usize,
        malformed: usize,
        outliers: usize,
        messages: usize,
    },
    /// Window closed with zero readings; nothing was published
    Empty { malformed: usize },
    /// Cancelled while collecting; the partial window is discarded
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub cycles: u32,
    pub published_cycles: u32,
    pub empty_cycles: u32,
    pub messages_published: usize,
}

pub struct PipelineRunner {
    config: PipelineConfig,
    collector: StreamCollector,
    queue: Arc<dyn DurableQueue>,
    state: RunState,
    consecutive_empty: u32,
}

impl PipelineRunner {
    pub fn new(
        config: PipelineConfig,
        bus: Arc<dyn PubSubBus>,
        queue: Arc<dyn DurableQueue>,
    ) -> Self {
        let collector = StreamCollector::new(bus, config.progress_every);
        Self {
            config,
            collector,
            queue,
            state: RunState::Idle,
            consecutive_empty: 0,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn consecutive_empty(&self) -> u32 {
        self.consecutive_empty
    }

    fn transition(&mut self, next: RunState) {
        if !self.state.can_transition_to(next) {
            log::error!("❌ Illegal state transition {} → {}", self.state, next);
            return;
        }
        log::info!("🔄 {} → {}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, error: PipelineError) -> PipelineError {
        log::error!("❌ Pipeline failed in {}: {}", self.state, error);
        self.transition(RunState::Failed);
        error
    }

    /// Run one collect → clean → publish cycle
    pub async fn run_cycle(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<CycleResult, PipelineError> {
        match self.state {
            RunState::Failed => return Err(PipelineError::AlreadyFailed),
            RunState::Done => self.transition(RunState::Idle),
            _ => {}
        }

        self.transition(RunState::Collecting);
        let collected = self
            .collector
            .collect(&self.config.mqtt_topic, self.config.collect_window, cancel)
            .await;
        let report = match collected {
            Ok(report) => report,
            Err(e) => return Err(self.fail(e)),
        };

        if report.close_reason == CloseReason::Cancelled {
            log::warn!(
                "⚠️  Collection cancelled, discarding {} reading(s)",
                report.readings.len()
            );
            self.transition(RunState::Idle);
            return Ok(CycleResult::Cancelled);
        }

        if report.is_empty() {
            self.transition(RunState::Idle);
            return self.record_empty_cycle(report.malformed);
        }
        self.consecutive_empty = 0;

        self.transition(RunState::Cleaning);
        let batch = clean_and_aggregate(&report.readings, self.config.outlier_threshold);

        log::info!("🧹 Cleaned {} readings", report.readings.len());
        log::info!("   ├─ Clean: {}", batch.clean_count());
        log::info!(
            "   ├─ Outliers (> {}): {}",
            self.config.outlier_threshold,
            batch.outliers.len()
        );
        log::info!("   └─ Days: {}", batch.aggregates.len());
        for outlier in &batch.outliers {
            log::debug!("   outlier ts={} value={}", outlier.timestamp, outlier.value);
        }
        for aggregate in &batch.aggregates {
            log::info!(
                "   {} avg={:.2} ({} readings)",
                aggregate.day,
                aggregate.avg,
                aggregate.count
            );
        }

        self.transition(RunState::Publishing);
        let published = publish_aggregates(
            self.queue.as_ref(),
            &self.config.queue_name,
            &batch.aggregates,
        )
        .await;
        let messages = match published {
            Ok(sent) => sent,
            Err(e) => return Err(self.fail(e)),
        };

        self.transition(RunState::Done);
        Ok(CycleResult::Published {
            readings: report.readings.len(),
            malformed: report.malformed,
            outliers: batch.outliers.len(),
            messages,
        })
    }

    fn record_empty_cycle(&mut self, malformed: usize) -> Result<CycleResult, PipelineError> {
        self.consecutive_empty += 1;
        let streak = self.consecutive_empty;

        log::warn!(
            "⚠️  No readings in window ({} malformed), empty streak: {}",
            malformed,
            streak
        );

        let alert = self.config.empty_cycle_alert;
        if alert > 0 && streak % alert == 0 {
            log::error!(
                "🚨 No data on '{}' for {} consecutive windows, check the publisher",
                self.config.mqtt_topic,
                streak
            );
        }

        let max = self.config.max_empty_cycles;
        if max > 0 && streak >= max {
            return Err(self.fail(PipelineError::NoData { cycles: streak }));
        }

        Ok(CycleResult::Empty { malformed })
    }

    /// Run cycles until one publishes (`run_once`), cancellation, or a fatal error
    ///
    /// Between cycles the runner waits `retry_delay`; the wait is cut short
    /// by cancellation.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::default();

        log::info!("🚀 Starting pipeline runner");
        log::info!("   ├─ Topic: {}", self.config.mqtt_topic);
        log::info!("   ├─ Queue: {}", self.config.queue_name);
        log::info!("   ├─ Window: {}s", self.config.collect_window.as_secs());
        log::info!("   └─ Run once: {}", self.config.run_once);

        loop {
            summary.cycles += 1;
            match self.run_cycle(cancel).await? {
                CycleResult::Published { messages, .. } => {
                    summary.published_cycles += 1;
                    summary.messages_published += messages;
                    if self.config.run_once {
                        break;
                    }
                }
                CycleResult::Empty { .. } => summary.empty_cycles += 1,
                CycleResult::Cancelled => break,
            }

            log::info!("💤 Next cycle in {}s", self.config.retry_delay.as_secs());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.retry_delay) => {}
            }
        }

        log::info!("✅ Runner stopped after {} cycle(s)", summary.cycles);
        log::info!("   ├─ Published cycles: {}", summary.published_cycles);
        log::info!("   ├─ Empty cycles: {}", summary.empty_cycles);
        log::info!("   └─ Messages: {}", summary.messages_published);

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryBus, MemoryQueue};
    use std::time::Duration;

    fn make_test_config(max_empty_cycles: u32) -> PipelineConfig {
        PipelineConfig {
            collect_window: Duration::from_secs(10),
            retry_delay: Duration::from_secs(60),
            empty_cycle_alert: 2,
            max_empty_cycles,
            ..PipelineConfig::default()
        }
    }

    fn make_test_runner(
        config: PipelineConfig,
    ) -> (Arc<MemoryBus>, Arc<MemoryQueue>, PipelineRunner) {
        let bus = Arc::new(MemoryBus::default());
        let queue = Arc::new(MemoryQueue::new());
        let runner = PipelineRunner::new(config, bus.clone(), queue.clone());
        (bus, queue, runner)
    }

    #[test]
    fn test_state_transitions() {
        use RunState::*;
        assert!(Idle.can_transition_to(Collecting));
        assert!(Collecting.can_transition_to(Idle));
        assert!(Collecting.can_transition_to(Cleaning));
        assert!(Cleaning.can_transition_to(Publishing));
        assert!(Publishing.can_transition_to(Done));
        assert!(Done.can_transition_to(Idle));
        assert!(Publishing.can_transition_to(Failed));

        assert!(!Idle.can_transition_to(Publishing));
        assert!(!Cleaning.can_transition_to(Idle));
        assert!(!Failed.can_transition_to(Idle));
        assert!(Failed.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_cycle_returns_to_idle() {
        let (_bus, queue, mut runner) = make_test_runner(make_test_config(0));

        let result = runner.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(result, CycleResult::Empty { malformed: 0 });
        assert_eq!(runner.state(), RunState::Idle);
        assert_eq!(runner.consecutive_empty(), 1);
        // Nothing published, queue never declared
        assert!(!queue.is_declared("pm25_daily_avg"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_after_max_empty_cycles() {
        let (_bus, _queue, mut runner) = make_test_runner(make_test_config(3));

        let err = runner.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, PipelineError::NoData { cycles: 3 }));
        assert_eq!(runner.state(), RunState::Failed);
        assert!(matches!(
            runner.run_cycle(&CancellationToken::new()).await,
            Err(PipelineError::AlreadyFailed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_publishes_daily_aggregates() {
        let (bus, queue, mut runner) = make_test_runner(make_test_config(0));

        {
            let bus = bus.clone();
            tokio::spawn(async move {
                while bus.active_subscriptions("uo/pm25") == 0 {
                    tokio::task::yield_now().await;
                }
                for value in [10.0, 20.0, 60.0, 30.0] {
                    let payload = format!(r#"{{"ts": 1709251200, "value": {}}}"#, value);
                    bus.publish("uo/pm25", payload.into_bytes());
                }
            });
        }

        let result = runner.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            result,
            CycleResult::Published {
                readings: 4,
                malformed: 0,
                outliers: 1,
                messages: 1,
            }
        );
        assert_eq!(runner.state(), RunState::Done);
        assert_eq!(queue.ready_len("pm25_daily_avg"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_moves_to_failed() {
        let (bus, queue, mut runner) = make_test_runner(make_test_config(0));
        queue.fail_publishes_after(0);

        {
            let bus = bus.clone();
            tokio::spawn(async move {
                while bus.active_subscriptions("uo/pm25") == 0 {
                    tokio::task::yield_now().await;
                }
                bus.publish("uo/pm25", br#"{"ts": 1709251200, "value": 5.0}"#.to_vec());
            });
        }

        let err = runner.run_cycle(&CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.sent_before_failure(), Some(0));
        assert_eq!(runner.state(), RunState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_runner() {
        let (_bus, _queue, mut runner) = make_test_runner(make_test_config(0));
        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                cancel.cancel();
            });
        }

        let summary = runner.run(&cancel).await.unwrap();

        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.published_cycles, 0);
        assert_eq!(runner.state(), RunState::Idle);
    }
}
