//! Reconnect backoff for broker connections

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Doubling delay with a cap and a bounded number of attempts
#[derive(Debug)]
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempt: u32,
    jitter: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("gave up after {attempts} retry attempts")]
pub struct MaxRetriesExceeded {
    pub attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            attempt: 0,
            jitter: false,
        }
    }

    /// Broker defaults: 1s doubling up to 30s, 8 attempts, jittered
    pub fn for_broker() -> Self {
        Self {
            jitter: true,
            ..Self::new(Duration::from_secs(1), Duration::from_secs(30), 8)
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next retry, without jitter
    pub fn next_delay(&self) -> Duration {
        let factor = 2_u32.saturating_pow(self.attempt);
        self.base.saturating_mul(factor).min(self.cap)
    }

    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        if self.attempt >= self.max_attempts {
            return Err(MaxRetriesExceeded {
                attempts: self.attempt,
            });
        }

        let mut delay = self.next_delay();
        if self.jitter {
            // Up to +10%
            let extra = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 10);
            delay += Duration::from_millis(extra);
        }

        log::warn!(
            "⏳ Retry {} of {} in {:?}",
            self.attempt + 1,
            self.max_attempts,
            delay
        );

        tokio::time::sleep(delay).await;
        self.attempt += 1;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Run `attempt` until it succeeds, sleeping with `backoff` between failures.
///
/// Returns the last error once the retry budget is spent.
pub async fn retry_with_backoff<T, E, F, Fut>(
    what: &str,
    backoff: &mut ExponentialBackoff,
    mut attempt: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    loop {
        match attempt().await {
            Ok(value) => {
                backoff.reset();
                return Ok(value);
            }
            Err(e) => {
                log::error!("❌ {} failed: {}", what, e);
                if backoff.sleep().await.is_err() {
                    return Err(e);
                }
            }
        }
    }
}
