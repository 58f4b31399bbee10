//! JMS backend adapter for unibus
//!
//! This crate provides a JMS-style backend that implements the `Backend`
//! trait from `unibus-core`, mapping the unified topic model onto a JMS topic
//! with a session, a producer, and a selector-filtered consumer. Echo
//! suppression is delegated to the broker: outgoing messages carry the client
//! token as an `appId` string property, and the consumer's message selector
//! excludes that token.
//!
//! Like the AMQP adapter, all protocol work goes through a wire trait
//! ([`wire::JmsWire`]) so the lifecycle logic is testable without a broker.

pub mod backend;
pub mod error;
pub mod wire;

pub use backend::{JmsBackend, APP_ID_PROPERTY};
pub use error::WireError;
pub use wire::{
    ConnectOptions, JmsWire, JmsWireEvent, TextMessage, WireEventReceiver, WireEventSender,
};
