//! Bridge error types with CoAP response code mapping.
//!
//! [`BridgeError`] is the central error type for the bridge. Each variant
//! maps to a CoAP response code and a diagnostic text body, so request
//! handlers can turn any failure into a [`Reply`] at the call site.

use std::time::Duration;

use coap_lite::ResponseType;

use crate::coap::Reply;

/// Bridge-wide error enum with CoAP response code mapping.
///
/// # Categories
///
/// | Category   | Variants                                              | CoAP code              |
/// |------------|-------------------------------------------------------|------------------------|
/// | Validation | `InvalidJson`, `MissingTopic`, `InvalidObserve`       | 4.00 Bad Request       |
/// | Bus        | `Publish`                                             | 4.00 Bad Request       |
/// | Lifecycle  | `DispatcherClosed`                                    | 5.03 Service Unavailable |
/// | Delivery   | `Encode`, `Transport`, `DeliveryTimeout`, `Packet`    | 5.00 Internal Server Error |
/// | Startup    | `Config`, `Connect`, `Subscribe`                      | 5.00 Internal Server Error |
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The body of a publish request is not a valid JSON message.
    #[error("invalid JSON coap message: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// The observe resource was addressed without a topic.
    #[error("missing topic")]
    MissingTopic,

    /// The request is not a GET carrying Observe 0 or 1.
    #[error("invalid observe request")]
    InvalidObserve,

    /// The MQTT client refused or failed to publish a message.
    #[error("failed publishing message: {0}")]
    Publish(String),

    /// The dispatch loop has stopped and no longer accepts events.
    #[error("dispatcher is not running")]
    DispatcherClosed,

    /// A notification body could not be encoded.
    #[error("failed encoding notification: {0}")]
    Encode(#[source] serde_json::Error),

    /// A CoAP packet could not be built or parsed.
    #[error("malformed coap packet: {0}")]
    Packet(String),

    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A single delivery did not complete within the configured bound.
    #[error("delivery timed out after {0:?}")]
    DeliveryTimeout(Duration),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Could not connect to the MQTT broker.
    #[error("failed connecting to mqtt broker: {0}")]
    Connect(String),

    /// The broker rejected or never acknowledged the wildcard subscription.
    #[error("failed subscribing to mqtt topic: {0}")]
    Subscribe(String),
}

impl BridgeError {
    /// Returns the CoAP response code for this variant.
    #[must_use]
    pub const fn response_code(&self) -> ResponseType {
        match self {
            Self::InvalidJson(_) | Self::MissingTopic | Self::InvalidObserve | Self::Publish(_) => {
                ResponseType::BadRequest
            }
            Self::DispatcherClosed => ResponseType::ServiceUnavailable,
            Self::Encode(_)
            | Self::Packet(_)
            | Self::Transport(_)
            | Self::DeliveryTimeout(_)
            | Self::Config(_)
            | Self::Connect(_)
            | Self::Subscribe(_) => ResponseType::InternalServerError,
        }
    }

    /// Returns `true` for errors caused by the requesting peer.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self.response_code(), ResponseType::BadRequest)
    }
}

impl From<BridgeError> for Reply {
    fn from(err: BridgeError) -> Self {
        Self::new(err.response_code(), err.to_string())
    }
}
