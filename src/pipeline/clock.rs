//! Time source for the drain loop

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Monotonic clock the drain consumer reads its budget from
#[async_trait]
pub trait Clock: Send + Sync {
    /// Time since an arbitrary fixed origin
    fn elapsed(&self) -> Duration;

    async fn sleep(&self, duration: Duration);
}

/// Tokio-backed clock (honours `tokio::time::pause` in tests)
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that only moves when told to. `sleep` advances it instantly.
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        assert_eq!(clock.elapsed(), Duration::ZERO);

        clock.sleep(Duration::from_millis(200)).await;
        clock.advance(Duration::from_secs(1));

        assert_eq!(clock.elapsed(), Duration::from_millis(1200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock::new();
        clock.sleep(Duration::from_secs(25)).await;
        assert!(clock.elapsed() >= Duration::from_secs(25));
    }
}
