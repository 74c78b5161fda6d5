//! `/sub/{topic}` — observe registration and deregistration.
//!
//! The handler never touches the observer set. It only validates the
//! request and forwards a signal to the dispatch loop, which is the sole
//! owner of that state.

use coap_lite::{RequestType, ResponseType};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::coap::{CoapPeer, Handler, Reply, Request};
use crate::domain::DispatcherHandle;
use crate::error::BridgeError;

/// Route parameter carrying the observed topic.
pub const TOPIC_PARAM: &str = "topic";

/// Observe option value starting an observation.
pub const OBSERVE_REGISTER: u32 = 0;

/// Observe option value cancelling an observation.
pub const OBSERVE_DEREGISTER: u32 = 1;

/// What a valid observe request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveAction {
    /// Observe value 0.
    Register,
    /// Observe value 1.
    Deregister,
}

impl ObserveAction {
    /// Classifies a request by method and Observe option value.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidObserve`] unless the request is a GET
    /// carrying Observe 0 or 1.
    pub fn from_request(method: RequestType, observe: Option<u32>) -> Result<Self, BridgeError> {
        if method != RequestType::Get {
            return Err(BridgeError::InvalidObserve);
        }
        match observe {
            Some(OBSERVE_REGISTER) => Ok(Self::Register),
            Some(OBSERVE_DEREGISTER) => Ok(Self::Deregister),
            _ => Err(BridgeError::InvalidObserve),
        }
    }
}

/// Turns observe requests into registration signals.
#[derive(Debug, Clone)]
pub struct ObserveHandler {
    dispatcher: DispatcherHandle<CoapPeer>,
}

impl ObserveHandler {
    /// Creates a handler signalling `dispatcher`.
    #[must_use]
    pub const fn new(dispatcher: DispatcherHandle<CoapPeer>) -> Self {
        Self { dispatcher }
    }

    /// Validates `request` and signals the dispatch loop.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MissingTopic`] without a topic,
    /// [`BridgeError::InvalidObserve`] for anything but GET with Observe 0
    /// or 1, and [`BridgeError::DispatcherClosed`] if the loop has stopped.
    pub async fn observe(&self, request: Request) -> Result<ObserveAction, BridgeError> {
        let topic = request
            .param(TOPIC_PARAM)
            .ok_or(BridgeError::MissingTopic)?
            .to_string();
        let action = ObserveAction::from_request(request.method, request.observe)?;

        match action {
            ObserveAction::Register => {
                self.dispatcher
                    .register(request.token, topic, request.peer)
                    .await?;
            }
            ObserveAction::Deregister => self.dispatcher.deregister(request.token).await?,
        }
        Ok(action)
    }
}

impl Handler for ObserveHandler {
    fn handle(&self, request: Request) -> BoxFuture<'_, Reply> {
        async move {
            let peer = request.peer.addr();
            let token = request.token.clone();
            tracing::debug!(peer = %peer, token = %token, "[coap] got sub message");
            match self.observe(request).await {
                Ok(action) => {
                    tracing::debug!(peer = %peer, token = %token, action = ?action, "observe accepted");
                    Reply::empty(ResponseType::Content)
                }
                Err(err) => {
                    if err.is_client_error() {
                        tracing::debug!(peer = %peer, error = %err, "observe rejected");
                    } else {
                        tracing::error!(peer = %peer, error = %err, "observe failed");
                    }
                    err.into()
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_with_zero_registers() {
        let action = ObserveAction::from_request(RequestType::Get, Some(0));
        assert!(matches!(action, Ok(ObserveAction::Register)));
    }

    #[test]
    fn get_with_one_deregisters() {
        let action = ObserveAction::from_request(RequestType::Get, Some(1));
        assert!(matches!(action, Ok(ObserveAction::Deregister)));
    }

    #[test]
    fn anything_else_is_invalid() {
        let cases = [
            (RequestType::Get, None),
            (RequestType::Get, Some(2)),
            (RequestType::Post, Some(0)),
            (RequestType::Put, Some(1)),
            (RequestType::Delete, None),
        ];
        for (method, observe) in cases {
            let label = format!("{method:?} {observe:?}");
            let result = ObserveAction::from_request(method, observe);
            assert!(matches!(result, Err(BridgeError::InvalidObserve)), "{label}");
        }
    }
}
