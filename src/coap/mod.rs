//! CoAP layer: UDP server, path routing, peer handles, deduplication and
//! keep-alive.
//!
//! The server decodes datagrams with `coap-lite`, routes requests by
//! Uri-Path to a [`Handler`], and frames the handler's [`Reply`]. Observer
//! notifications leave through [`CoapPeer`], which implements
//! [`crate::domain::ObserverConnection`].

pub mod exchange;
pub mod handler;
pub mod keepalive;
pub mod peer;
pub mod router;
pub mod server;

pub use handler::{Handler, Reply, Request};
pub use keepalive::KeepAliveConfig;
pub use peer::{CoapPeer, MessageIds};
pub use router::Router;
pub use server::CoapServer;
