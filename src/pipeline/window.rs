//! Collection window: append-only buffer of readings with a single close

use super::types::Reading;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Why a collection window was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The window duration elapsed
    Timeout,
    /// The caller cancelled collection
    Cancelled,
    /// The subscription producer went away before the window elapsed
    SourceEnded,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CloseReason::Timeout => "timeout",
            CloseReason::Cancelled => "cancelled",
            CloseReason::SourceEnded => "source ended",
        };
        f.write_str(label)
    }
}

/// Open collection window
///
/// Readings are kept in arrival order. `close` consumes the window, so a
/// closed window can neither be appended to nor closed again.
#[derive(Debug)]
pub struct CollectionWindow {
    readings: Vec<Reading>,
    malformed: usize,
    opened_at: DateTime<Utc>,
    duration: Duration,
}

impl CollectionWindow {
    pub fn open(duration: Duration) -> Self {
        Self::open_at(Utc::now(), duration)
    }

    pub fn open_at(opened_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            readings: Vec::with_capacity(256),
            malformed: 0,
            opened_at,
            duration,
        }
    }

    pub fn push(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    pub fn record_malformed(&mut self) {
        self.malformed += 1;
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn malformed(&self) -> usize {
        self.malformed
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn close(self, reason: CloseReason) -> WindowReport {
        self.close_at(Utc::now(), reason)
    }

    pub fn close_at(self, closed_at: DateTime<Utc>, reason: CloseReason) -> WindowReport {
        WindowReport {
            readings: self.readings,
            malformed: self.malformed,
            close_reason: reason,
            opened_at: self.opened_at,
            closed_at,
        }
    }
}

/// Contents of a closed window
#[derive(Debug, Clone)]
pub struct WindowReport {
    pub readings: Vec<Reading>,
    pub malformed: usize,
    pub close_reason: CloseReason,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl WindowReport {
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.closed_at - self.opened_at
    }
}
