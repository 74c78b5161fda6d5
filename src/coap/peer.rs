//! Peer connection handle and notification framing.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use coap_lite::{ContentFormat, MessageClass, MessageType, Packet, ResponseType};
use tokio::net::UdpSocket;

use crate::domain::{Notification, ObserverConnection};
use crate::error::BridgeError;

/// Observe option values are 24 bits wide; sequence numbers wrap there.
const OBSERVE_MASK: u32 = 0x00FF_FFFF;

/// Shared source of CoAP message IDs for messages the server originates.
#[derive(Debug, Clone)]
pub struct MessageIds(Arc<AtomicU16>);

impl MessageIds {
    /// Starts the sequence at `seed`.
    #[must_use]
    pub fn new(seed: u16) -> Self {
        Self(Arc::new(AtomicU16::new(seed)))
    }

    /// Returns the next message ID, wrapping at `u16::MAX`.
    #[must_use]
    pub fn next_id(&self) -> u16 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// A peer reachable through the server's UDP socket.
///
/// Cheap to clone; all clones share the socket and message-ID source.
#[derive(Debug, Clone)]
pub struct CoapPeer {
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
    ids: MessageIds,
}

impl CoapPeer {
    /// Creates a handle for `addr` on `socket`.
    #[must_use]
    pub const fn new(socket: Arc<UdpSocket>, addr: SocketAddr, ids: MessageIds) -> Self {
        Self { socket, addr, ids }
    }

    /// Peer address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Message-ID source shared with the server.
    #[must_use]
    pub const fn ids(&self) -> &MessageIds {
        &self.ids
    }

    /// Encodes and writes `packet` to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Packet`] if the packet cannot be encoded and
    /// [`BridgeError::Transport`] if the socket write fails.
    pub async fn send(&self, packet: &Packet) -> Result<(), BridgeError> {
        let bytes = packet
            .to_bytes()
            .map_err(|e| BridgeError::Packet(format!("{e:?}")))?;
        self.socket.send_to(&bytes, self.addr).await?;
        Ok(())
    }
}

/// Builds the Non-confirmable `2.05 Content` packet for one notification.
#[must_use]
pub fn notification_packet(notification: Notification, message_id: u16) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::NonConfirmable);
    packet.header.code = MessageClass::Response(ResponseType::Content);
    packet.header.message_id = message_id;
    packet.set_token(notification.token.as_bytes().to_vec());
    packet.set_observe_value(notification.sequence & OBSERVE_MASK);
    packet.set_content_format(ContentFormat::ApplicationJSON);
    packet.payload = notification.body;
    packet
}

impl ObserverConnection for CoapPeer {
    fn peer(&self) -> &dyn fmt::Display {
        &self.addr
    }

    async fn notify(&self, notification: Notification) -> Result<(), BridgeError> {
        let packet = notification_packet(notification, self.ids.next_id());
        self.send(&packet).await
    }
}
