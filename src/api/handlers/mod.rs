//! CoAP resource handlers.

pub mod observe;
pub mod publish;

pub use observe::ObserveHandler;
pub use publish::PublishHandler;
