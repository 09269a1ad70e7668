use super::backoff::{retry_with_backoff, ExponentialBackoff};
use super::{PubSubBus, Subscription, TransportError};
use crate::pipeline::config::PipelineConfig;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// MQTT subscriber (EMQX / Mosquitto on the edge)
///
/// Each subscription gets its own client connection and event-loop task, so
/// releasing a subscription also tears down its connection.
pub struct MqttBus {
    host: String,
    port: u16,
    client_id_prefix: String,
    keep_alive: Duration,
    handshake_timeout: Duration,
    channel_capacity: usize,
}

impl MqttBus {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            client_id_prefix: config.mqtt_client_id.clone(),
            keep_alive: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(10),
            channel_capacity: config.subscription_buffer,
        }
    }

    async fn subscribe_once(&self, topic: &str) -> Result<Subscription, TransportError> {
        let client_id = format!("{}-{:08x}", self.client_id_prefix, rand::random::<u32>());
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        let (tx, rx) = mpsc::channel(self.channel_capacity);

        // Nothing reaches the broker until the event loop is polled; wait for SUBACK
        let handshake = async {
            loop {
                let event = eventloop
                    .poll()
                    .await
                    .map_err(|e| TransportError::Connection(e.to_string()))?;
                match classify_event(event) {
                    EventAction::Subscribed => return Ok::<(), TransportError>(()),
                    EventAction::Forward(payload) => {
                        if tx.try_send(payload).is_err() {
                            log::debug!("Dropped early PUBLISH on '{}': buffer full", topic);
                        }
                    }
                    EventAction::Resubscribe | EventAction::Ignore => {}
                }
            }
        };
        tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| {
                TransportError::Connection(format!(
                    "no SUBACK from {}:{} within {:?}",
                    self.host, self.port, self.handshake_timeout
                ))
            })??;

        let release = CancellationToken::new();

        tokio::spawn(pump_publishes(
            client,
            eventloop,
            topic.to_string(),
            tx,
            release.clone(),
        ));

        Ok(Subscription::new(topic, rx, release))
    }
}

#[async_trait]
impl PubSubBus for MqttBus {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        log::info!("🔌 Subscribing to MQTT {}:{} topic '{}'", self.host, self.port, topic);

        let mut backoff = ExponentialBackoff::for_broker();
        let subscription = retry_with_backoff("MQTT subscribe", &mut backoff, || {
            self.subscribe_once(topic)
        })
        .await?;

        log::info!("✅ Subscribed to '{}'", topic);
        Ok(subscription)
    }

    fn backend_type(&self) -> &'static str {
        "MQTT"
    }
}

/// What the subscriber does with one event-loop event
#[derive(Debug, PartialEq)]
enum EventAction {
    Forward(Vec<u8>),
    Subscribed,
    /// Fresh CONNACK: a clean session has no subscriptions
    Resubscribe,
    Ignore,
}

fn classify_event(event: Event) -> EventAction {
    match event {
        Event::Incoming(Packet::Publish(publish)) => EventAction::Forward(publish.payload.to_vec()),
        Event::Incoming(Packet::SubAck(_)) => EventAction::Subscribed,
        Event::Incoming(Packet::ConnAck(_)) => EventAction::Resubscribe,
        _ => EventAction::Ignore,
    }
}

/// Event-loop task: forwards PUBLISH payloads until the subscription is
/// released, then unsubscribes and disconnects.
///
/// rumqttc reconnects on the next poll after an error. The session is
/// clean, so the topic is subscribed again on every reconnect CONNACK.
async fn pump_publishes(
    client: AsyncClient,
    mut eventloop: EventLoop,
    topic: String,
    tx: mpsc::Sender<Vec<u8>>,
    release: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = release.cancelled() => break,
            event = eventloop.poll() => match event.map(classify_event) {
                Ok(EventAction::Forward(payload)) => {
                    if tx.send(payload).await.is_err() {
                        // Reader closed the window
                        break;
                    }
                }
                Ok(EventAction::Resubscribe) => {
                    log::info!("🔄 MQTT reconnected, resubscribing to '{}'", topic);
                    if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtMostOnce) {
                        log::error!("❌ Resubscribe to '{}' not queued: {}", topic, e);
                    }
                }
                Ok(EventAction::Subscribed) | Ok(EventAction::Ignore) => {}
                Err(e) => {
                    log::warn!("⚠️  MQTT connection error on '{}': {}", topic, e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    if let Err(e) = client.unsubscribe(topic.clone()).await {
        log::debug!("Unsubscribe request for '{}' not queued: {}", topic, e);
    }
    let _ = client.disconnect().await;

    // Flush UNSUBSCRIBE/DISCONNECT out of the request queue
    let flushed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;

    if flushed.is_err() {
        log::warn!("⚠️  MQTT disconnect for '{}' timed out", topic);
    }
    log::debug!("🔌 Released MQTT subscription '{}'", topic);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish, SubAck, SubscribeReasonCode};

    #[test]
    fn test_reconnect_connack_triggers_resubscribe() {
        // Test: a CONNACK after a dropped connection must lead to SUBSCRIBE again
        let connack = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        )));
        assert_eq!(classify_event(connack), EventAction::Resubscribe);
    }

    #[test]
    fn test_event_classification() {
        let publish = Publish::new("uo/pm25", QoS::AtMostOnce, br#"{"ts": 1, "value": 2}"#.to_vec());
        assert_eq!(
            classify_event(Event::Incoming(Packet::Publish(publish))),
            EventAction::Forward(br#"{"ts": 1, "value": 2}"#.to_vec())
        );

        let suback = SubAck::new(1, vec![SubscribeReasonCode::Success(QoS::AtMostOnce)]);
        assert_eq!(
            classify_event(Event::Incoming(Packet::SubAck(suback))),
            EventAction::Subscribed
        );

        assert_eq!(
            classify_event(Event::Incoming(Packet::PingResp)),
            EventAction::Ignore
        );
        assert_eq!(classify_event(Event::Outgoing(Outgoing::PingReq)), EventAction::Ignore);
    }
}
