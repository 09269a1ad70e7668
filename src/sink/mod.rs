//! Downstream hand-off for the drained daily series
//!
//! The drain binary merges what it pulled off the queue by day and writes
//! the ordered series to one or more sinks:
//! - `jsonl_writer` - append-only JSON lines, one per day per drain
//! - `sqlite_writer` - `daily_averages` table keyed by day (UPSERT)

pub mod jsonl_writer;
pub mod sqlite_writer;
pub mod writer;
pub mod writer_backend;

use std::env;

pub use jsonl_writer::DailySeriesJsonlWriter;
pub use sqlite_writer::DailySeriesSqliteWriter;
pub use writer::DailySeriesWriter;
pub use writer_backend::{DailySeriesSink, SinkError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Jsonl,
    Sqlite,
}

impl BackendType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "jsonl" => Some(BackendType::Jsonl),
            "sqlite" => Some(BackendType::Sqlite),
            _ => None,
        }
    }

    /// `--backend jsonl|sqlite` restricts output to one sink; default is both
    pub fn parse_from_args<I>(args: I) -> Vec<BackendType>
    where
        I: IntoIterator<Item = String>,
    {
        let args: Vec<String> = args.into_iter().collect();

        if let Some(idx) = args.iter().position(|x| x == "--backend") {
            if let Some(backend) = args.get(idx + 1).and_then(|s| Self::parse(s)) {
                return vec![backend];
            }
            log::warn!("⚠️  Unknown --backend value, writing to all sinks");
        }

        vec![BackendType::Jsonl, BackendType::Sqlite]
    }
}

/// Where the drained series is written
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub backends: Vec<BackendType>,
    pub jsonl_path: String,
    pub db_path: String,
}

impl SinkConfig {
    /// Environment variables:
    /// - `DAILY_JSONL_PATH` (default: daily_avg.jsonl)
    /// - `DAILY_DB_PATH` (default: daily_avg.db)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok(), env::args())
    }

    pub fn from_lookup<F, I>(lookup: F, args: I) -> Self
    where
        F: Fn(&str) -> Option<String>,
        I: IntoIterator<Item = String>,
    {
        Self {
            backends: BackendType::parse_from_args(args),
            jsonl_path: lookup("DAILY_JSONL_PATH").unwrap_or_else(|| "daily_avg.jsonl".to_string()),
            db_path: lookup("DAILY_DB_PATH").unwrap_or_else(|| "daily_avg.db".to_string()),
        }
    }

    /// Open one writer per configured backend
    pub fn open_writers(&self) -> Result<Vec<DailySeriesWriter>, SinkError> {
        self.backends
            .iter()
            .map(|backend| match backend {
                BackendType::Jsonl => DailySeriesWriter::new(*backend, &self.jsonl_path),
                BackendType::Sqlite => DailySeriesWriter::new(*backend, &self.db_path),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_backend_from_args() {
        assert_eq!(
            BackendType::parse_from_args(args(&["drain_daily", "--backend", "sqlite"])),
            vec![BackendType::Sqlite]
        );
        assert_eq!(
            BackendType::parse_from_args(args(&["drain_daily"])),
            vec![BackendType::Jsonl, BackendType::Sqlite]
        );
        assert_eq!(
            BackendType::parse_from_args(args(&["drain_daily", "--backend", "csv"])),
            vec![BackendType::Jsonl, BackendType::Sqlite]
        );
    }

    #[test]
    fn test_sink_config_defaults() {
        let config = SinkConfig::from_lookup(|_| None, args(&["drain_daily"]));
        assert_eq!(config.jsonl_path, "daily_avg.jsonl");
        assert_eq!(config.db_path, "daily_avg.db");
        assert_eq!(config.backends.len(), 2);
    }
}
