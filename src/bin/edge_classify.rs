//! Edge Classify - label live readings GREEN / YELLOW / RED
//!
//! Listens to the readings topic for `CLASSIFY_WINDOW_SECS`, classifies every
//! reading, and logs the per-label counts.
//!
//! Usage:
//!   cargo run --release --bin edge_classify

use chrono::DateTime;
use dotenv::dotenv;
use env_logger::Env;
use log::{info, warn};
use pmflow::classify::{classify_all, AirQualityLabel, ReadingClassifier, ThresholdClassifier};
use pmflow::pipeline::{PipelineConfig, StreamCollector};
use pmflow::transport::MqttBus;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = PipelineConfig::from_env();
    let classifier = ThresholdClassifier::from_config(&config);

    info!("🚀 pmflow edge_classify");
    info!("   ├─ MQTT: {}:{} '{}'", config.mqtt_host, config.mqtt_port, config.mqtt_topic);
    info!("   ├─ Window: {}s", config.classify_window.as_secs());
    info!(
        "   └─ Classifier: {} (YELLOW from {}, RED from {})",
        classifier.name(),
        classifier.yellow_from,
        classifier.red_from
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("🛑 Ctrl+C received, closing window early...");
                cancel.cancel();
            }
        });
    }

    let collector = StreamCollector::new(Arc::new(MqttBus::new(&config)), config.progress_every);
    let report = collector
        .collect(&config.mqtt_topic, config.classify_window, &cancel)
        .await?;

    if report.is_empty() {
        warn!("⚠️  No readings received, nothing to classify");
        return Ok(());
    }

    let (classified, summary) = classify_all(&classifier, &report.readings);
    for reading in &classified {
        let when = DateTime::from_timestamp(reading.ts, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| reading.ts.to_string());
        info!("📩 [{}] PM2.5={:.2} → {}", when, reading.value, reading.label);
    }

    info!("📊 Classified {} reading(s)", summary.total());
    info!("   ├─ {}: {}", AirQualityLabel::Green, summary.green);
    info!("   ├─ {}: {}", AirQualityLabel::Yellow, summary.yellow);
    info!("   └─ {}: {}", AirQualityLabel::Red, summary.red);

    Ok(())
}
