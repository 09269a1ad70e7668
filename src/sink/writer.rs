//! Unified writer interface for the daily series
//!
//! Routes writes to either the JSONL or the SQLite backend.

use super::jsonl_writer::DailySeriesJsonlWriter;
use super::sqlite_writer::DailySeriesSqliteWriter;
use super::writer_backend::{DailySeriesSink, SinkError};
use super::BackendType;
use crate::pipeline::types::RelayMessage;
use std::path::Path;

pub enum DailySeriesWriter {
    Jsonl(DailySeriesJsonlWriter),
    Sqlite(DailySeriesSqliteWriter),
}

impl DailySeriesWriter {
    pub fn new(backend: BackendType, path: impl AsRef<Path>) -> Result<Self, SinkError> {
        match backend {
            BackendType::Jsonl => Ok(DailySeriesWriter::Jsonl(DailySeriesJsonlWriter::new(path)?)),
            BackendType::Sqlite => Ok(DailySeriesWriter::Sqlite(DailySeriesSqliteWriter::new(
                path,
            )?)),
        }
    }

    pub async fn write_series(&mut self, series: &[RelayMessage]) -> Result<usize, SinkError> {
        match self {
            DailySeriesWriter::Jsonl(w) => w.write_series(series).await,
            DailySeriesWriter::Sqlite(w) => w.write_series(series).await,
        }
    }

    pub async fn flush(&mut self) -> Result<(), SinkError> {
        match self {
            DailySeriesWriter::Jsonl(w) => w.flush().await,
            DailySeriesWriter::Sqlite(w) => w.flush().await,
        }
    }

    /// Get backend type for logging
    pub fn backend_type(&self) -> &'static str {
        match self {
            DailySeriesWriter::Jsonl(w) => w.backend_type(),
            DailySeriesWriter::Sqlite(w) => w.backend_type(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_routes_to_backend() {
        let dir = tempdir().unwrap();
        let series = [RelayMessage { ts: 1_709_251_200, avg: 3.0 }];

        let mut jsonl = DailySeriesWriter::new(BackendType::Jsonl, dir.path().join("d.jsonl")).unwrap();
        let mut sqlite = DailySeriesWriter::new(BackendType::Sqlite, dir.path().join("d.db")).unwrap();

        assert_eq!(jsonl.backend_type(), "JSONL");
        assert_eq!(sqlite.backend_type(), "SQLite");
        assert_eq!(jsonl.write_series(&series).await.unwrap(), 1);
        assert_eq!(sqlite.write_series(&series).await.unwrap(), 1);
        jsonl.flush().await.unwrap();
        sqlite.flush().await.unwrap();
    }
}
