//! AMQP 0-9-1 backend adapter for unibus
//!
//! This crate provides an AMQP backend that implements the `Backend` trait
//! from `unibus-core`, mapping the unified topic model onto a fanout exchange
//! with a per-client private queue. Echo suppression is delegated to the
//! broker's `no-local` consume flag.
//!
//! The adapter is written against the [`wire::AmqpWire`] trait rather than a
//! concrete protocol stack, so the same lifecycle logic runs over a real
//! AMQP connection or the in-process loopback used by tests.

pub mod backend;
pub mod error;
pub mod wire;

pub use backend::AmqpBackend;
pub use error::WireError;
pub use wire::{
    AmqpProperties, AmqpWire, AmqpWireEvent, ChannelId, ConnectOptions, ConsumeOptions,
    WireEventReceiver, WireEventSender,
};
