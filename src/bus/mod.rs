//! Bus layer: the MQTT client facade.
//!
//! [`BusPublisher`] is the only bus capability request handlers need; the
//! MQTT implementation lives in [`mqtt`].

pub mod mqtt;

use std::future::Future;

pub use mqtt::{BrokerAddr, MqttBus, MqttInbound, MqttSettings};

use crate::error::BridgeError;

/// Subscription filter covering every topic.
pub const WILDCARD: &str = "#";

/// Publishes payloads onto the bus with at-most-once delivery.
pub trait BusPublisher: Send + Sync + 'static {
    /// Publishes `payload` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Publish`] if the client could not queue the
    /// message.
    fn publish(
        &self,
        topic: &str,
        payload: &str,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;
}
