//! JSONL writer for the daily series - one line per day, appended per drain

use super::writer_backend::{DailySeriesSink, SinkError};
use crate::pipeline::types::RelayMessage;
use async_trait::async_trait;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Serialize)]
struct DailyLine {
    day: String,
    ts: i64,
    avg: f64,
}

pub struct DailySeriesJsonlWriter {
    writer: BufWriter<std::fs::File>,
}

impl DailySeriesJsonlWriter {
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        log::info!("📝 Writing daily series to: {}", path.display());
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn write_message(&mut self, message: &RelayMessage) -> Result<bool, SinkError> {
        let Some(day) = message.day() else {
            log::warn!("⚠️  Skipping message with out-of-range ts={}", message.ts);
            return Ok(false);
        };

        let line = DailyLine {
            day: day.format("%Y-%m-%d").to_string(),
            ts: message.ts,
            avg: message.avg,
        };
        let json = serde_json::to_string(&line)?;
        writeln!(self.writer, "{}", json)?;
        Ok(true)
    }
}

impl Drop for DailySeriesJsonlWriter {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

#[async_trait]
impl DailySeriesSink for DailySeriesJsonlWriter {
    async fn write_series(&mut self, series: &[RelayMessage]) -> Result<usize, SinkError> {
        let mut written = 0;
        for message in series {
            if self.write_message(message)? {
                written += 1;
            }
        }
        Ok(written)
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "JSONL"
    }
}
