//! Drain Daily - read daily averages back from the durable queue
//!
//! Drains the queue within `DRAIN_BUDGET_SECS`, merges by day (last write
//! wins), and writes the ordered series to the configured sinks.
//!
//! Usage:
//!   cargo run --release --bin drain_daily [-- --backend jsonl|sqlite]

use dotenv::dotenv;
use env_logger::Env;
use log::{error, info, warn};
use pmflow::pipeline::{
    merge_by_day, DrainConsumer, DrainSettings, PipelineConfig, TokioClock,
};
use pmflow::sink::SinkConfig;
use pmflow::transport::{AmqpQueue, DurableQueue};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Days shown in the log preview
const PREVIEW_DAYS: usize = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = PipelineConfig::from_env();
    let sinks = SinkConfig::from_env();

    info!("🚀 pmflow drain_daily");
    info!("   ├─ RabbitMQ: {} queue '{}'", config.amqp_target(), config.queue_name);
    info!("   ├─ Budget: {}s", config.drain_budget.as_secs());
    info!("   └─ Sinks: {:?}", sinks.backends);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("🛑 Ctrl+C received, stopping drain...");
                cancel.cancel();
            }
        });
    }

    let queue = match AmqpQueue::connect_with_retry(&config.amqp_uri(), &config.amqp_target()).await
    {
        Ok(queue) => queue,
        Err(e) => {
            error!("❌ Could not connect to RabbitMQ at {}: {}", config.amqp_target(), e);
            return Err(e.into());
        }
    };
    queue.declare(&config.queue_name).await?;

    let consumer = DrainConsumer::new(DrainSettings::from(&config), Arc::new(TokioClock::new()));
    let report = consumer
        .drain(&queue, &config.queue_name, config.drain_budget, &cancel)
        .await;
    queue.close().await;

    let series = merge_by_day(&report.messages);
    if series.is_empty() {
        warn!("⚠️  No daily averages on '{}', nothing to hand off", config.queue_name);
        return Ok(());
    }

    info!(
        "📈 {} message(s) merged into {} day(s)",
        report.messages.len(),
        series.len()
    );
    for message in series.iter().take(PREVIEW_DAYS) {
        match message.day() {
            Some(day) => info!("   ├─ {} avg={:.2}", day, message.avg),
            None => info!("   ├─ ts={} avg={:.2}", message.ts, message.avg),
        }
    }
    if series.len() > PREVIEW_DAYS {
        info!("   └─ ... {} more", series.len() - PREVIEW_DAYS);
    }

    for mut writer in sinks.open_writers()? {
        let written = writer.write_series(&series).await?;
        writer.flush().await?;
        info!("✅ Wrote {} day(s) to {}", written, writer.backend_type());
    }

    Ok(())
}
