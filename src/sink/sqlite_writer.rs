//! SQLite writer for the daily series
//!
//! One row per UTC day. Writing a day that already exists replaces its
//! average, so repeated drains of republished days converge to the last
//! value seen.

use super::writer_backend::{DailySeriesSink, SinkError};
use crate::pipeline::types::RelayMessage;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;

pub struct DailySeriesSqliteWriter {
    conn: Connection,
}

impl DailySeriesSqliteWriter {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, SinkError> {
        if let Some(parent) = db_path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS daily_averages (
                day TEXT PRIMARY KEY,
                ts INTEGER NOT NULL,
                avg REAL NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_daily_ts ON daily_averages(ts)",
            [],
        )?;

        log::info!("✅ SQLite daily series initialized");
        Ok(Self { conn })
    }

    /// Full stored series, ascending by `ts`
    pub fn read_series(&self) -> Result<Vec<RelayMessage>, SinkError> {
        let mut stmt = self
            .conn
            .prepare("SELECT ts, avg FROM daily_averages ORDER BY ts ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(RelayMessage {
                ts: row.get(0)?,
                avg: row.get(1)?,
            })
        })?;

        let mut series = Vec::new();
        for row in rows {
            series.push(row?);
        }
        Ok(series)
    }
}

#[async_trait]
impl DailySeriesSink for DailySeriesSqliteWriter {
    async fn write_series(&mut self, series: &[RelayMessage]) -> Result<usize, SinkError> {
        let now = chrono::Utc::now().timestamp();
        let tx = self.conn.transaction()?;
        let mut written = 0;

        for message in series {
            let Some(day) = message.day() else {
                log::warn!("⚠️  Skipping message with out-of-range ts={}", message.ts);
                continue;
            };
            tx.execute(
                "INSERT INTO daily_averages (day, ts, avg, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(day) DO UPDATE SET
                    ts = excluded.ts,
                    avg = excluded.avg,
                    updated_at = excluded.updated_at",
                params![day.format("%Y-%m-%d").to_string(), message.ts, message.avg, now],
            )?;
            written += 1;
        }

        tx.commit()?;
        log::debug!("✅ Upserted {} day(s) into daily_averages", written);
        Ok(written)
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        // Each write_series commits its own transaction
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_day() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("daily.db");
        let mut writer = DailySeriesSqliteWriter::new(&db_path).unwrap();

        writer
            .write_series(&[
                RelayMessage { ts: 1_709_251_200, avg: 10.0 },
                RelayMessage { ts: 1_709_337_600, avg: 20.0 },
            ])
            .await
            .unwrap();
        // Republished first day with a new value
        writer
            .write_series(&[RelayMessage { ts: 1_709_251_200, avg: 12.5 }])
            .await
            .unwrap();

        let series = writer.read_series().unwrap();
        assert_eq!(
            series,
            vec![
                RelayMessage { ts: 1_709_251_200, avg: 12.5 },
                RelayMessage { ts: 1_709_337_600, avg: 20.0 },
            ]
        );

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM daily_averages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_empty_series_writes_nothing() {
        let dir = tempdir().unwrap();
        let mut writer = DailySeriesSqliteWriter::new(dir.path().join("daily.db")).unwrap();

        assert_eq!(writer.write_series(&[]).await.unwrap(), 0);
        assert!(writer.read_series().unwrap().is_empty());
    }
}
