//! # mqtt-coap-bridge
//!
//! Bridges an MQTT broker and CoAP clients that observe topics.
//!
//! CoAP peers register with `GET /sub/{topic}` (Observe 0) and then receive
//! a notification for every MQTT message published on exactly that topic,
//! until they deregister (Observe 1). `POST /pub` publishes a JSON
//! `{"topic","payload"}` body on MQTT.
//!
//! ## Architecture
//!
//! ```text
//! MQTT broker                         CoAP peers (UDP)
//!     │  ▲                               │  ▲
//!     │  └── MqttBus (bus/) ◄── /pub ────┤  │
//!     │                                  │  │
//!     ▼                                  ▼  │
//! MqttInbound ──► Dispatcher (domain/) ◄── /sub ── CoapServer (coap/)
//!                     │                         │
//!                     └── ObserverRegistry ─────┘ notifications
//! ```
//!
//! The [`domain::Dispatcher`] is the only owner of observer state; every
//! other task talks to it through a [`domain::DispatcherHandle`].

pub mod api;
pub mod bus;
pub mod cli;
pub mod coap;
pub mod config;
pub mod domain;
pub mod error;
