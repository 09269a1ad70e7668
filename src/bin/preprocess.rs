//! Preprocess - collect readings, average per day, relay to the durable queue
//!
//! Usage:
//!   cargo run --release --bin preprocess
//!
//! Configuration comes from the environment (and `.env`), see `PipelineConfig`.
//! Exits non-zero if the queue broker is unreachable or a publish fails.

use dotenv::dotenv;
use env_logger::Env;
use log::{error, info};
use pmflow::pipeline::{PipelineConfig, PipelineRunner};
use pmflow::transport::{AmqpQueue, MqttBus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = PipelineConfig::from_env();

    info!("🚀 pmflow preprocess");
    info!("   ├─ MQTT: {}:{} '{}'", config.mqtt_host, config.mqtt_port, config.mqtt_topic);
    info!("   ├─ RabbitMQ: {} queue '{}'", config.amqp_target(), config.queue_name);
    info!("   ├─ Window: {}s", config.collect_window.as_secs());
    info!("   └─ Outlier threshold: {}", config.outlier_threshold);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("🛑 Ctrl+C received, shutting down...");
                cancel.cancel();
            }
        });
    }

    let queue = match AmqpQueue::connect_with_retry(&config.amqp_uri(), &config.amqp_target()).await
    {
        Ok(queue) => Arc::new(queue),
        Err(e) => {
            error!("❌ Could not connect to RabbitMQ at {}: {}", config.amqp_target(), e);
            return Err(e.into());
        }
    };
    let bus = Arc::new(MqttBus::new(&config));

    let mut runner = PipelineRunner::new(config, bus, queue.clone());
    let result = runner.run(&cancel).await;
    queue.close().await;

    match result {
        Ok(_) => {
            info!("✅ Preprocess finished");
            Ok(())
        }
        Err(e) => {
            error!("❌ Preprocess failed: {}", e);
            Err(e.into())
        }
    }
}
