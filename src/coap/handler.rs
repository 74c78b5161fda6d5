//! Request/reply types and the [`Handler`] trait.

use std::collections::HashMap;
use std::future::Future;

use coap_lite::{RequestType, ResponseType};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use super::CoapPeer;
use crate::domain::ObserveToken;

/// A decoded CoAP request as seen by a handler.
#[derive(Debug, Clone)]
pub struct Request {
    /// Request method.
    pub method: RequestType,
    /// Token chosen by the peer.
    pub token: ObserveToken,
    /// Observe option value, if present and well-formed.
    pub observe: Option<u32>,
    /// Parameters captured by the matched route pattern.
    pub params: HashMap<String, String>,
    /// Request body.
    pub payload: Vec<u8>,
    /// Connection to the requesting peer.
    pub peer: CoapPeer,
}

impl Request {
    /// Returns a captured route parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Response code and text body produced by a handler.
///
/// The server frames it: token echo, message type, and `text/plain`
/// content format when the body is non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// CoAP response code.
    pub code: ResponseType,
    /// Diagnostic or result text. Empty for no payload.
    pub body: String,
}

impl Reply {
    /// Creates a reply.
    #[must_use]
    pub fn new(code: ResponseType, body: impl Into<String>) -> Self {
        Self {
            code,
            body: body.into(),
        }
    }

    /// Creates a reply without a body.
    #[must_use]
    pub fn empty(code: ResponseType) -> Self {
        Self::new(code, String::new())
    }
}

/// Handles a request routed to a resource and produces a reply.
pub trait Handler: Send + Sync + 'static {
    /// Handles one request.
    fn handle(&self, request: Request) -> BoxFuture<'_, Reply>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    fn handle(&self, request: Request) -> BoxFuture<'_, Reply> {
        (self)(request).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_compare_by_code_and_body() {
        assert_eq!(
            Reply::new(ResponseType::BadRequest, "missing topic"),
            Reply::new(ResponseType::BadRequest, "missing topic")
        );
        assert_ne!(
            Reply::empty(ResponseType::Content),
            Reply::empty(ResponseType::Valid)
        );
        assert!(Reply::empty(ResponseType::Content).body.is_empty());
    }
}
