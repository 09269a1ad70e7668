use super::backoff::{retry_with_backoff, ExponentialBackoff};
use super::{Delivery, DurableQueue, TransportError};
use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicPublishOptions, BasicRejectOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

/// AMQP 0-9-1 delivery mode for messages written to disk by the broker
const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// RabbitMQ-backed durable queue (one connection, one channel)
pub struct AmqpQueue {
    connection: Connection,
    channel: Channel,
}

impl AmqpQueue {
    pub async fn connect(uri: &str) -> Result<Self, TransportError> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(Self {
            connection,
            channel,
        })
    }

    /// Connect with exponential backoff. `target` is the host shown in logs
    /// (the URI carries credentials).
    pub async fn connect_with_retry(uri: &str, target: &str) -> Result<Self, TransportError> {
        log::info!("🔌 Connecting to RabbitMQ at {} ...", target);

        let mut backoff = ExponentialBackoff::for_broker();
        let queue = retry_with_backoff("RabbitMQ connect", &mut backoff, || Self::connect(uri))
            .await?;

        log::info!("✅ Connected to RabbitMQ at {}", target);
        Ok(queue)
    }

    pub async fn close(&self) {
        if let Err(e) = self.connection.close(200, "bye").await {
            log::debug!("RabbitMQ close: {}", e);
        }
    }
}

#[async_trait]
impl DurableQueue for AmqpQueue {
    async fn declare(&self, queue: &str) -> Result<(), TransportError> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Declare(e.to_string()))?;
        Ok(())
    }

    async fn publish_persistent(
        &self,
        queue: &str,
        message_id: &str,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_content_type("application/json".into())
            .with_message_id(message_id.into());

        // The returned confirm is dropped: publishing does not wait on the broker
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>, TransportError> {
        let message = self
            .channel
            .basic_get(queue, BasicGetOptions { no_ack: false })
            .await
            .map_err(|e| TransportError::Retrieve(e.to_string()))?;

        Ok(message.map(|m| Delivery {
            tag: m.delivery.delivery_tag,
            payload: m.delivery.data.clone(),
            redelivered: m.delivery.redelivered,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.channel
            .basic_ack(delivery.tag, BasicAckOptions::default())
            .await
            .map_err(|e| TransportError::Acknowledge(e.to_string()))
    }

    async fn reject(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.channel
            .basic_reject(delivery.tag, BasicRejectOptions { requeue: false })
            .await
            .map_err(|e| TransportError::Acknowledge(e.to_string()))
    }

    fn backend_type(&self) -> &'static str {
        "AMQP"
    }
}
