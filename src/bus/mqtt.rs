//! MQTT client facade built on `rumqttc`.
//!
//! [`MqttBus::connect`] performs the blocking startup sequence (connect,
//! then one wildcard subscription) and splits the client in two:
//!
//! - [`MqttBus`], a cloneable publisher used by request handlers;
//! - [`MqttInbound`], which owns the event loop and forwards every
//!   received publish to the dispatch loop.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS, SubscribeReasonCode};

use super::{BusPublisher, WILDCARD};
use crate::domain::{BusMessage, DispatcherHandle, ObserverConnection};
use crate::error::BridgeError;

/// Default MQTT port when the broker address has none.
pub const DEFAULT_PORT: u16 = 1883;

/// Bound of the client's outgoing request queue.
const REQUEST_CAPACITY: usize = 64;

/// Broker host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddr {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl FromStr for BrokerAddr {
    type Err = BridgeError;

    /// Accepts `tcp://host:port`, `mqtt://host:port`, `host:port` or `host`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| BridgeError::Config(format!("broker address {raw:?}: {reason}"));

        let rest = ["tcp://", "mqtt://"]
            .iter()
            .find_map(|scheme| raw.strip_prefix(scheme))
            .unwrap_or(raw)
            .trim_end_matches('/');
        if rest.contains("://") {
            return Err(invalid("unsupported scheme"));
        }

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => return Err(invalid("unexpected text after IPv6 literal")),
            }
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = match port {
            Some(port) => port.parse().map_err(|_| invalid("invalid port"))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BrokerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Connection parameters for [`MqttBus::connect`].
#[derive(Debug, Clone)]
pub struct MqttSettings {
    /// Broker to connect to.
    pub broker: BrokerAddr,
    /// MQTT client identifier.
    pub client_id: String,
    /// Keep-alive interval (at least one second).
    pub keep_alive: Duration,
    /// Bound on the startup connect and subscribe handshakes.
    pub connect_timeout: Duration,
    /// Pause after a connection error before polling again.
    pub reconnect_delay: Duration,
}

/// Publishing half of the MQTT client.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
}

/// Receiving half of the MQTT client.
pub struct MqttInbound {
    client: AsyncClient,
    eventloop: EventLoop,
    pending: Vec<BusMessage>,
    reconnect_delay: Duration,
}

impl MqttBus {
    /// Connects to the broker and subscribes to every topic.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] for an empty client id,
    /// [`BridgeError::Connect`] if the broker cannot be reached or
    /// refuses the connection, and [`BridgeError::Subscribe`] if the
    /// wildcard subscription is rejected. Both handshakes are bounded by
    /// `connect_timeout`.
    pub async fn connect(settings: &MqttSettings) -> Result<(Self, MqttInbound), BridgeError> {
        if settings.client_id.is_empty() || settings.client_id.starts_with(' ') {
            return Err(BridgeError::Config(format!(
                "invalid mqtt client id {:?}",
                settings.client_id
            )));
        }

        let mut options = MqttOptions::new(
            settings.client_id.clone(),
            settings.broker.host.clone(),
            settings.broker.port,
        );
        options.set_keep_alive(settings.keep_alive.max(Duration::from_secs(1)));

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        tokio::time::timeout(settings.connect_timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| BridgeError::Connect("timed out".to_string()))??;
        tracing::info!(broker = %settings.broker, client_id = %settings.client_id, "connected to mqtt broker");

        let mut inbound = MqttInbound {
            client: client.clone(),
            eventloop,
            pending: Vec::new(),
            reconnect_delay: settings.reconnect_delay,
        };
        tokio::time::timeout(settings.connect_timeout, inbound.subscribe_all())
            .await
            .map_err(|_| BridgeError::Subscribe("timed out".to_string()))??;
        tracing::info!(filter = WILDCARD, "subscribed to mqtt topics");

        Ok((Self { client }, inbound))
    }
}

impl BusPublisher for MqttBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BridgeError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .await
            .map_err(|e| BridgeError::Publish(e.to_string()))
    }
}

impl MqttInbound {
    async fn subscribe_all(&mut self) -> Result<(), BridgeError> {
        self.client
            .subscribe(WILDCARD, QoS::AtMostOnce)
            .await
            .map_err(|e| BridgeError::Subscribe(e.to_string()))?;

        loop {
            let event = self
                .eventloop
                .poll()
                .await
                .map_err(|e| BridgeError::Subscribe(e.to_string()))?;
            match event {
                Event::Incoming(Packet::SubAck(ack)) => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        return Err(BridgeError::Subscribe(format!(
                            "broker rejected filter {WILDCARD}"
                        )));
                    }
                    return Ok(());
                }
                Event::Incoming(Packet::Publish(publish)) => {
                    self.pending.push(to_message(&publish));
                }
                _ => {}
            }
        }
    }

    /// Forwards every received publish to the dispatch loop.
    ///
    /// Connection errors are logged; polling resumes after the reconnect
    /// delay, and a fresh connection re-issues the wildcard subscription.
    /// Returns once the dispatch loop has stopped.
    pub async fn run<C: ObserverConnection>(mut self, dispatcher: DispatcherHandle<C>) {
        for message in std::mem::take(&mut self.pending) {
            if dispatcher.deliver(message).await.is_err() {
                tracing::error!("dispatcher closed, stopping mqtt receive loop");
                return;
            }
        }

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    tracing::debug!(topic = %publish.topic, pkid = publish.pkid, "[mqtt] got message");
                    if dispatcher.deliver(to_message(&publish)).await.is_err() {
                        tracing::error!("dispatcher closed, stopping mqtt receive loop");
                        return;
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("reconnected to mqtt broker");
                    if let Err(err) = self.client.try_subscribe(WILDCARD, QoS::AtMostOnce) {
                        tracing::error!(error = %err, "failed re-subscribing to mqtt topics");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "mqtt connection error");
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), BridgeError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(err) => return Err(BridgeError::Connect(err.to_string())),
        }
    }
}

fn to_message(publish: &Publish) -> BusMessage {
    BusMessage::new(
        publish.topic.clone(),
        String::from_utf8_lossy(&publish.payload).into_owned(),
    )
}

impl fmt::Debug for MqttBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttBus").finish_non_exhaustive()
    }
}

impl fmt::Debug for MqttInbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttInbound")
            .field("pending", &self.pending.len())
            .field("reconnect_delay", &self.reconnect_delay)
            .finish_non_exhaustive()
    }
}
