//! pmflow - PM2.5 ingestion and daily relay
//!
//! Collects sensor readings from an MQTT topic in bounded windows, averages
//! them per UTC day, relays the averages through a durable AMQP queue, and
//! drains them back for forecasting and classification consumers.

pub mod classify;
pub mod pipeline;
pub mod sink;
pub mod transport;
