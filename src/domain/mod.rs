//! Domain layer: observation tokens, bus messages, the observer registry
//! and the dispatch loop that owns it.
//!
//! Nothing in this module knows about UDP or MQTT. Delivery goes through
//! the [`ObserverConnection`] trait, which the CoAP layer implements.

pub mod connection;
pub mod dispatcher;
pub mod message;
pub mod observer;
pub mod signal;
pub mod token;

pub use connection::{Notification, ObserverConnection};
pub use dispatcher::{Dispatcher, DispatcherHandle, FanOutReport, channel};
pub use message::BusMessage;
pub use observer::{INITIAL_SEQUENCE, Observer, ObserverRegistry};
pub use signal::RegistrationSignal;
pub use token::ObserveToken;
