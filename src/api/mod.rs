//! CoAP resource layer: handlers and routing table composition.
//!
//! | Resource        | Purpose                                  |
//! |-----------------|------------------------------------------|
//! | `/pub`          | publish `{"topic","payload"}` on MQTT    |
//! | `/sub/{topic*}` | observe (0) or stop observing (1) a topic |

pub mod handlers;

use crate::bus::BusPublisher;
use crate::coap::{CoapPeer, Router};
use crate::domain::DispatcherHandle;
use crate::error::BridgeError;

use handlers::observe::TOPIC_PARAM;
use handlers::{ObserveHandler, PublishHandler};

/// Path of the publish resource.
pub const PUBLISH_PATH: &str = "/pub";

/// Builds the routing table for all bridge resources.
///
/// # Errors
///
/// Returns [`BridgeError::Config`] if a route pattern fails to compile.
pub fn build_router<P: BusPublisher>(
    bus: P,
    dispatcher: DispatcherHandle<CoapPeer>,
) -> Result<Router, BridgeError> {
    Router::new()
        .route(PUBLISH_PATH, PublishHandler::new(bus))?
        .route(&format!("/sub/{{{TOPIC_PARAM}*}}"), ObserveHandler::new(dispatcher))
}
