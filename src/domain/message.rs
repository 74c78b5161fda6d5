//! Messages crossing the bridge in either direction.
//!
//! The same `{topic, payload}` shape is the body of a CoAP publish request
//! and the body of every notification pushed to an observer.

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// A topic-tagged payload.
///
/// Produced by the MQTT receive loop (inbound) or decoded from a CoAP
/// publish request (outbound). Consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    /// MQTT topic, matched by exact string equality.
    pub topic: String,
    /// Payload text.
    pub payload: String,
}

impl BusMessage {
    /// Creates a new message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Decodes a message from a JSON request body.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidJson`] if the body is not a JSON
    /// object with string `topic` and `payload` fields.
    pub fn from_json(body: &[u8]) -> Result<Self, BridgeError> {
        serde_json::from_slice(body).map_err(BridgeError::InvalidJson)
    }

    /// Encodes the message as a JSON notification body.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Encode`] if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, BridgeError> {
        serde_json::to_vec(self).map_err(BridgeError::Encode)
    }
}
