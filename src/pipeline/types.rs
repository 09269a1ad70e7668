//! Core data types for the daily relay pipeline

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

pub const SECONDS_PER_DAY: i64 = 86_400;

/// 2000-01-01T00:00:00Z
pub const MIN_PLAUSIBLE_TS: i64 = 946_684_800;

/// 2100-01-01T00:00:00Z (exclusive)
pub const MAX_PLAUSIBLE_TS: i64 = 4_102_444_800;

/// Single sensor reading as published on the topic: `{"ts": <int>, "value": <float>}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(rename = "ts")]
    pub timestamp: i64,
    pub value: f64,
}

/// Why an inbound payload was not accepted as a Reading
#[derive(Debug, thiserror::Error)]
pub enum ReadingRejection {
    #[error("unparseable payload: {0}")]
    Unparseable(#[from] serde_json::Error),

    #[error("value {0} is not finite")]
    NonFinite(f64),

    #[error("value {0} is negative")]
    Negative(f64),

    #[error("timestamp {0} is not a plausible unix second count")]
    ImplausibleTimestamp(i64),
}

impl Reading {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Parse and validate a raw topic payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, ReadingRejection> {
        let reading: Reading = serde_json::from_slice(payload)?;
        reading.validate()?;
        Ok(reading)
    }

    pub fn validate(&self) -> Result<(), ReadingRejection> {
        if !self.value.is_finite() {
            return Err(ReadingRejection::NonFinite(self.value));
        }
        if self.value < 0.0 {
            return Err(ReadingRejection::Negative(self.value));
        }
        if !(MIN_PLAUSIBLE_TS..MAX_PLAUSIBLE_TS).contains(&self.timestamp) {
            return Err(ReadingRejection::ImplausibleTimestamp(self.timestamp));
        }
        Ok(())
    }

    /// UTC calendar day of the reading
    pub fn day(&self) -> Option<NaiveDate> {
        utc_day(self.timestamp)
    }
}

/// Midnight (00:00:00 UTC) of the day containing `ts`
pub fn midnight_utc(ts: i64) -> i64 {
    ts.div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY
}

/// UTC calendar date of `ts`, `None` outside chrono's range
pub fn utc_day(ts: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive())
}

/// Mean of all clean readings for one UTC calendar day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAggregate {
    pub day: NaiveDate,
    pub avg: f64,
    /// 00:00:00 UTC of `day`
    pub ts: i64,
    /// Number of readings averaged
    pub count: usize,
}

impl DailyAggregate {
    /// Merge key used on the queue and by downstream consumers
    pub fn message_id(&self) -> String {
        self.day.format("%Y-%m-%d").to_string()
    }
}

/// Queue wire form of a daily aggregate: `{"ts": <int>, "avg": <float>}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub ts: i64,
    pub avg: f64,
}

impl RelayMessage {
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Day index since the epoch; identical for every message about the same day
    pub fn day_key(&self) -> i64 {
        self.ts.div_euclid(SECONDS_PER_DAY)
    }

    pub fn day(&self) -> Option<NaiveDate> {
        utc_day(self.ts)
    }
}

impl From<&DailyAggregate> for RelayMessage {
    fn from(aggregate: &DailyAggregate) -> Self {
        Self {
            ts: aggregate.ts,
            avg: aggregate.avg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_from_payload() {
        let reading = Reading::from_payload(br#"{"ts": 1700000000, "value": 12.5}"#).unwrap();
        assert_eq!(reading, Reading::new(1_700_000_000, 12.5));

        // Integer values are accepted as floats
        let reading = Reading::from_payload(br#"{"ts": 1700000000, "value": 7}"#).unwrap();
        assert_eq!(reading.value, 7.0);
    }

    #[test]
    fn test_reading_rejections() {
        assert!(matches!(
            Reading::from_payload(b"not json"),
            Err(ReadingRejection::Unparseable(_))
        ));
        assert!(matches!(
            Reading::from_payload(br#"{"ts": 1700000000}"#),
            Err(ReadingRejection::Unparseable(_))
        ));
        assert!(matches!(
            Reading::from_payload(br#"{"value": 3.0}"#),
            Err(ReadingRejection::Unparseable(_))
        ));
        assert!(matches!(
            Reading::from_payload(br#"{"ts": 1700000000, "value": -1.0}"#),
            Err(ReadingRejection::Negative(_))
        ));
        // Milliseconds instead of seconds
        assert!(matches!(
            Reading::from_payload(br#"{"ts": 1700000000000, "value": 1.0}"#),
            Err(ReadingRejection::ImplausibleTimestamp(_))
        ));
        assert!(matches!(
            Reading::new(1_700_000_000, f64::NAN).validate(),
            Err(ReadingRejection::NonFinite(_))
        ));
    }

    #[test]
    fn test_midnight_and_day() {
        // 2023-11-14T22:13:20Z
        let ts = 1_700_000_000;
        assert_eq!(midnight_utc(ts), 1_699_920_000);
        assert_eq!(utc_day(ts), NaiveDate::from_ymd_opt(2023, 11, 14));
        assert_eq!(midnight_utc(1_699_920_000), 1_699_920_000);
    }

    #[test]
    fn test_relay_message_wire_format() {
        let aggregate = DailyAggregate {
            day: NaiveDate::from_ymd_opt(2023, 11, 14).unwrap(),
            avg: 12.25,
            ts: 1_699_920_000,
            count: 4,
        };
        let message = RelayMessage::from(&aggregate);
        let json: serde_json::Value =
            serde_json::from_slice(&message.to_payload().unwrap()).unwrap();

        assert_eq!(json, serde_json::json!({"ts": 1_699_920_000, "avg": 12.25}));
        assert_eq!(aggregate.message_id(), "2023-11-14");
        assert_eq!(message.day(), Some(aggregate.day));
    }
}
