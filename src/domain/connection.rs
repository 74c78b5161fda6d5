//! Delivery seam between the dispatch loop and the transport.

use std::fmt;
use std::future::Future;

use super::ObserveToken;
use crate::error::BridgeError;

/// One notification handed to a connection for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Token of the observation being notified.
    pub token: ObserveToken,
    /// Observe sequence number for this delivery.
    pub sequence: u32,
    /// JSON-encoded [`super::BusMessage`].
    pub body: Vec<u8>,
}

/// Transport-level handle to an observing peer.
///
/// The registry stores a clone of the handle per observer but never owns
/// the underlying socket; the transport decides how a notification is
/// framed and written.
pub trait ObserverConnection: Clone + Send + Sync + 'static {
    /// Peer address used in log fields.
    fn peer(&self) -> &dyn fmt::Display;

    /// Writes one notification to the peer.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the notification could not be framed
    /// or written.
    fn notify(
        &self,
        notification: Notification,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;
}
