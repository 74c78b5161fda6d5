//! Bridge configuration from the command line and environment.
//!
//! The three required values come from positional arguments (see
//! [`crate::cli`]); tuning knobs come from environment variables (or a
//! `.env` file via `dotenvy`) and fall back to defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::bus::{BrokerAddr, MqttSettings};
use crate::cli::Cli;
use crate::coap::KeepAliveConfig;
use crate::error::BridgeError;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Top-level bridge configuration.
///
/// Built once at startup via [`BridgeConfig::from_cli`].
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// MQTT connection parameters.
    pub mqtt: MqttSettings,

    /// Address the CoAP server binds to.
    pub coap_addr: SocketAddr,

    /// Idle peer probing; `None` disables it.
    pub keepalive: Option<KeepAliveConfig>,

    /// Bound of the dispatch loop's channels.
    pub dispatch_capacity: usize,

    /// Bound on a single notification write; `None` waits indefinitely.
    pub delivery_timeout: Option<Duration>,

    /// Log output format.
    pub log_format: LogFormat,
}

impl BridgeConfig {
    /// Combines parsed arguments with environment settings.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if the broker address is invalid.
    pub fn from_cli(cli: &Cli) -> Result<Self, BridgeError> {
        dotenvy::dotenv().ok();

        let broker: BrokerAddr = cli.broker.parse()?;

        let mqtt = MqttSettings {
            broker,
            client_id: cli.client_id.clone(),
            keep_alive: Duration::from_secs(parse_env("MQTT_KEEP_ALIVE_SECS", 2u64).max(1)),
            connect_timeout: Duration::from_secs(parse_env("MQTT_CONNECT_TIMEOUT_SECS", 10)),
            reconnect_delay: Duration::from_millis(parse_env("MQTT_RECONNECT_DELAY_MS", 1_000)),
        };

        let probes = parse_env("COAP_KEEPALIVE_PROBES", 8u32);
        let interval = Duration::from_millis(parse_env("COAP_KEEPALIVE_INTERVAL_MS", 2_000));
        let keepalive = (probes > 0 && !interval.is_zero()).then_some(KeepAliveConfig {
            probes,
            interval,
        });

        let delivery_timeout =
            Some(Duration::from_millis(parse_env("DELIVERY_TIMEOUT_MS", 2_000)))
                .filter(|t| !t.is_zero());

        let log_format = match std::env::var("LOG_FORMAT").ok().as_deref() {
            Some("json") | Some("JSON") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            mqtt,
            coap_addr: SocketAddr::new(
                parse_env("COAP_BIND_HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
                cli.coap_port,
            ),
            keepalive,
            dispatch_capacity: parse_env("DISPATCH_CHANNEL_CAPACITY", 1usize).max(1),
            delivery_timeout,
            log_format,
        })
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn cli(broker: &str) -> Cli {
        Cli {
            broker: broker.to_string(),
            client_id: "bridge".to_string(),
            coap_port: 5683,
        }
    }

    #[test]
    fn builds_from_arguments() {
        let Ok(config) = BridgeConfig::from_cli(&cli("tcp://localhost:1884")) else {
            panic!("valid arguments rejected");
        };
        assert_eq!(config.mqtt.broker.host, "localhost");
        assert_eq!(config.mqtt.broker.port, 1884);
        assert_eq!(config.mqtt.client_id, "bridge");
        assert_eq!(config.coap_addr.port(), 5683);
        assert!(config.dispatch_capacity >= 1);
        assert!(config.mqtt.keep_alive >= Duration::from_secs(1));
    }

    #[test]
    fn invalid_broker_is_config_error() {
        let result = BridgeConfig::from_cli(&cli("ws://broker"));
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn parse_env_falls_back_on_missing_key() {
        let value: u32 = parse_env("MQTT_COAP_BRIDGE_TEST_UNSET_KEY", 42);
        assert_eq!(value, 42);
    }
}
