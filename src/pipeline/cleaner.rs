//! Outlier filtering and per-day aggregation

use super::types::{midnight_utc, utc_day, DailyAggregate, Reading};
use std::collections::BTreeMap;

/// Result of cleaning one window
#[derive(Debug, Clone, Default)]
pub struct CleanedBatch {
    /// Readings above the threshold, in input order
    pub outliers: Vec<Reading>,
    /// One aggregate per UTC day with at least one clean reading, ascending
    pub aggregates: Vec<DailyAggregate>,
}

impl CleanedBatch {
    pub fn clean_count(&self) -> usize {
        self.aggregates.iter().map(|a| a.count).sum()
    }
}

#[derive(Default)]
struct DayAccumulator {
    sum: f64,
    count: usize,
}

/// Split readings into outliers (`value > threshold`) and clean readings,
/// then average the clean ones per UTC calendar day.
pub fn clean_and_aggregate(readings: &[Reading], threshold: f64) -> CleanedBatch {
    let mut outliers = Vec::new();
    // Keyed by midnight so iteration order is ascending day order
    let mut days: BTreeMap<i64, DayAccumulator> = BTreeMap::new();

    for reading in readings {
        if reading.value > threshold {
            outliers.push(*reading);
            continue;
        }
        if reading.day().is_none() {
            log::warn!(
                "⚠️  Reading at ts={} has no calendar day, treating as outlier",
                reading.timestamp
            );
            outliers.push(*reading);
            continue;
        }

        let day = days.entry(midnight_utc(reading.timestamp)).or_default();
        day.sum += reading.value;
        day.count += 1;
    }

    let aggregates = days
        .into_iter()
        .filter_map(|(midnight, acc)| {
            utc_day(midnight).map(|day| DailyAggregate {
                day,
                avg: acc.sum / acc.count as f64,
                ts: midnight,
                count: acc.count,
            })
        })
        .collect();

    CleanedBatch {
        outliers,
        aggregates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    // 2024-03-01T00:00:00Z
    const DAY_ONE: i64 = 1_709_251_200;
    const DAY: i64 = 86_400;

    #[test]
    fn test_threshold_split() {
        // Test: [10, 20, 60, 30] same day, threshold 50
        let readings: Vec<Reading> = [10.0, 20.0, 60.0, 30.0]
            .iter()
            .enumerate()
            .map(|(i, v)| Reading::new(DAY_ONE + 3600 * i as i64, *v))
            .collect();

        let batch = clean_and_aggregate(&readings, 50.0);

        assert_eq!(batch.outliers, vec![Reading::new(DAY_ONE + 7200, 60.0)]);
        assert_eq!(batch.aggregates.len(), 1);
        assert!((batch.aggregates[0].avg - 20.0).abs() < 1e-9);
        assert_eq!(batch.aggregates[0].ts, DAY_ONE);
        assert_eq!(batch.aggregates[0].count, 3);
        assert_eq!(batch.clean_count(), 3);
    }

    #[test]
    fn test_value_equal_to_threshold_is_clean() {
        let batch = clean_and_aggregate(&[Reading::new(DAY_ONE, 50.0)], 50.0);
        assert!(batch.outliers.is_empty());
        assert_eq!(batch.aggregates[0].avg, 50.0);
    }

    #[test]
    fn test_empty_input() {
        let batch = clean_and_aggregate(&[], 50.0);
        assert!(batch.outliers.is_empty());
        assert!(batch.aggregates.is_empty());
    }

    #[test]
    fn test_outlier_only_day_emits_nothing() {
        let readings = vec![
            Reading::new(DAY_ONE + 10, 5.0),
            Reading::new(DAY_ONE + DAY + 10, 99.0),
            Reading::new(DAY_ONE + DAY + 20, 120.0),
        ];

        let batch = clean_and_aggregate(&readings, 50.0);

        assert_eq!(batch.outliers.len(), 2);
        assert_eq!(batch.aggregates.len(), 1);
        assert_eq!(batch.aggregates[0].day, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[test]
    fn test_days_are_ascending_and_partitioned() {
        // Arrival order is not day order
        let readings = vec![
            Reading::new(DAY_ONE + 2 * DAY + 5, 3.0),
            Reading::new(DAY_ONE + 5, 1.0),
            Reading::new(DAY_ONE + DAY - 1, 2.0),
            Reading::new(DAY_ONE + DAY, 8.0),
            Reading::new(DAY_ONE + 2 * DAY + 6, 70.0),
        ];

        let batch = clean_and_aggregate(&readings, 50.0);

        let days: Vec<i64> = batch.aggregates.iter().map(|a| a.ts).collect();
        assert_eq!(days, vec![DAY_ONE, DAY_ONE + DAY, DAY_ONE + 2 * DAY]);
        // Every input lands in exactly one bucket
        assert_eq!(batch.clean_count() + batch.outliers.len(), readings.len());
        assert!((batch.aggregates[0].avg - 1.5).abs() < 1e-9);
        assert!((batch.aggregates[1].avg - 8.0).abs() < 1e-9);
        assert!((batch.aggregates[2].avg - 3.0).abs() < 1e-9);
    }
}
