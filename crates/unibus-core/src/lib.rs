//! Unibus Core
//!
//! This crate provides the connection lifecycle state machine, message
//! envelope codec, and backend capability interface for the unibus
//! topic pub/sub client. Backend adapters (AMQP-style, JMS-style) live in
//! their own crates and plug into [`UniversalClient`] through the
//! [`Backend`] trait; the lifecycle logic is implemented exactly once here.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod backend;
pub mod client;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod filter;
pub mod identity;
pub mod state;
pub mod topology;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use backend::{
    Backend, BackendCapabilities, BackendEvent, ChannelKind, CloseOutcome, CloseReport,
    EventReceiver, EventSender,
};
pub use client::{MessageHandler, UniversalClient};
pub use config::ClientConfig;
pub use envelope::{BodyEncoding, DeliveryMode, MessageEnvelope, Payload, WireBody};
pub use errors::{ChannelError, ClientError, ConnectionError, Result, UsageError};
pub use identity::ClientIdentity;
pub use state::{ConnectionState, LifecycleEvent, StateTransitionError};
pub use topology::{Credentials, Topology, ROUTING_KEY};
