//! Writer backend trait for the daily series

use crate::pipeline::types::RelayMessage;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Backend trait for writing a merged, time-ordered daily series
#[async_trait]
pub trait DailySeriesSink: Send {
    /// Write every day of the series. Returns the number of days written.
    async fn write_series(&mut self, series: &[RelayMessage]) -> Result<usize, SinkError>;

    /// Flush pending writes to storage
    async fn flush(&mut self) -> Result<(), SinkError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}
