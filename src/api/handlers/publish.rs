//! `/pub` — one-shot publish onto the bus.

use coap_lite::ResponseType;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::bus::BusPublisher;
use crate::coap::{Handler, Reply, Request};
use crate::domain::BusMessage;
use crate::error::BridgeError;

/// Decodes `{"topic", "payload"}` and publishes it on the bus.
#[derive(Debug, Clone)]
pub struct PublishHandler<P> {
    bus: P,
}

impl<P: BusPublisher> PublishHandler<P> {
    /// Creates a handler publishing through `bus`.
    #[must_use]
    pub const fn new(bus: P) -> Self {
        Self { bus }
    }

    /// Decodes and publishes one request body.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidJson`] for a malformed body and
    /// [`BridgeError::Publish`] if the bus rejects the message.
    pub async fn publish(&self, body: &[u8]) -> Result<(), BridgeError> {
        let message = BusMessage::from_json(body)?;
        self.bus.publish(&message.topic, &message.payload).await
    }
}

impl<P: BusPublisher> Handler for PublishHandler<P> {
    fn handle(&self, request: Request) -> BoxFuture<'_, Reply> {
        async move {
            tracing::debug!(peer = %request.peer.addr(), "[coap] got pub message");
            match self.publish(&request.payload).await {
                Ok(()) => Reply::empty(ResponseType::Valid),
                Err(err) => {
                    tracing::error!(peer = %request.peer.addr(), error = %err, "failed handling coap pub message");
                    err.into()
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// In-memory bus recording every publish.
    #[derive(Debug, Clone, Default)]
    struct MemoryBus {
        published: Arc<Mutex<Vec<(String, String)>>>,
        reject: bool,
    }

    impl BusPublisher for MemoryBus {
        async fn publish(&self, topic: &str, payload: &str) -> Result<(), BridgeError> {
            if self.reject {
                return Err(BridgeError::Publish("client closed".to_string()));
            }
            match self.published.lock() {
                Ok(mut published) => published.push((topic.to_string(), payload.to_string())),
                Err(_) => panic!("bus poisoned"),
            }
            Ok(())
        }
    }

    impl MemoryBus {
        fn published(&self) -> Vec<(String, String)> {
            match self.published.lock() {
                Ok(published) => published.clone(),
                Err(_) => panic!("bus poisoned"),
            }
        }
    }

    #[tokio::test]
    async fn valid_body_is_published() {
        let bus = MemoryBus::default();
        let handler = PublishHandler::new(bus.clone());

        let result = handler.publish(br#"{"topic":"a/b","payload":"x"}"#).await;

        assert!(result.is_ok());
        assert_eq!(bus.published(), vec![("a/b".to_string(), "x".to_string())]);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_without_publishing() {
        let bus = MemoryBus::default();
        let handler = PublishHandler::new(bus.clone());

        let Err(err) = handler.publish(b"not json").await else {
            panic!("malformed body accepted");
        };

        let reply = Reply::from(err);
        assert_eq!(reply.code, ResponseType::BadRequest);
        assert!(reply.body.contains("invalid JSON"));
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn bus_failure_is_bad_request() {
        let bus = MemoryBus {
            reject: true,
            ..MemoryBus::default()
        };
        let handler = PublishHandler::new(bus);

        let Err(err) = handler.publish(br#"{"topic":"t","payload":""}"#).await else {
            panic!("publish failure swallowed");
        };

        let reply = Reply::from(err);
        assert_eq!(reply.code, ResponseType::BadRequest);
        assert_eq!(reply.body, "failed publishing message: client closed");
    }
}
