//! Durable relay publisher

use super::error::PipelineError;
use super::types::{DailyAggregate, RelayMessage};
use crate::transport::DurableQueue;

/// Publish one persistent message per daily aggregate
///
/// Declares `queue_name` first (idempotent), even when there is nothing to
/// send. Each message carries the ISO day as its `message_id` so that a
/// republished day is recognisable downstream. The first failed publish
/// aborts the batch and reports how many messages went out before it.
pub async fn publish_aggregates(
    queue: &dyn DurableQueue,
    queue_name: &str,
    aggregates: &[DailyAggregate],
) -> Result<usize, PipelineError> {
    queue.declare(queue_name).await?;

    let total = aggregates.len();
    let mut sent = 0;

    for aggregate in aggregates {
        let payload = RelayMessage::from(aggregate).to_payload()?;

        queue
            .publish_persistent(queue_name, &aggregate.message_id(), &payload)
            .await
            .map_err(|source| PipelineError::Publish {
                sent,
                total,
                day: aggregate.day,
                source,
            })?;

        sent += 1;
        log::debug!(
            "📤 Published {} avg={:.2} ({} readings)",
            aggregate.day,
            aggregate.avg,
            aggregate.count
        );
    }

    log::info!(
        "📤 Published {} daily aggregate(s) to '{}' via {}",
        sent,
        queue_name,
        queue.backend_type()
    );
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryQueue;
    use chrono::NaiveDate;

    fn make_test_aggregate(day: u32, avg: f64) -> DailyAggregate {
        let day = NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        DailyAggregate {
            day,
            avg,
            ts: day.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp(),
            count: 10,
        }
    }

    #[tokio::test]
    async fn test_publish_declares_and_tags_messages() {
        let queue = MemoryQueue::new();
        let aggregates = vec![make_test_aggregate(1, 12.5), make_test_aggregate(2, 30.0)];

        let sent = publish_aggregates(&queue, "daily", &aggregates).await.unwrap();
        assert_eq!(sent, 2);

        let messages = queue.ready_messages("daily");
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.persistent));
        assert_eq!(messages[0].message_id.as_deref(), Some("2024-03-01"));
        assert_eq!(messages[1].message_id.as_deref(), Some("2024-03-02"));

        let first = RelayMessage::from_payload(&messages[0].payload).unwrap();
        assert_eq!(first.ts, 1_709_251_200);
        assert_eq!(first.avg, 12.5);
    }

    #[tokio::test]
    async fn test_empty_list_publishes_nothing() {
        // Test: empty aggregate list still declares the queue
        let queue = MemoryQueue::new();

        let sent = publish_aggregates(&queue, "daily", &[]).await.unwrap();

        assert_eq!(sent, 0);
        assert!(queue.is_declared("daily"));
        assert_eq!(queue.ready_len("daily"), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_reports_sent_count() {
        let queue = MemoryQueue::new();
        queue.fail_publishes_after(1);
        let aggregates = vec![
            make_test_aggregate(1, 1.0),
            make_test_aggregate(2, 2.0),
            make_test_aggregate(3, 3.0),
        ];

        let err = publish_aggregates(&queue, "daily", &aggregates)
            .await
            .unwrap_err();

        assert_eq!(err.sent_before_failure(), Some(1));
        match err {
            PipelineError::Publish { total, day, .. } => {
                assert_eq!(total, 3);
                assert_eq!(day, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(queue.ready_len("daily"), 1);
    }
}
