//! In-process loopback broker for unibus
//!
//! Provides a [`BrokerHub`] that routes messages between wire implementations
//! in the same process, plus loopback [`unibus_amqp::AmqpWire`] and
//! [`unibus_jms::JmsWire`] implementations over it. The hub honors the two
//! broker-side echo mechanisms the real backends rely on: the AMQP `no-local`
//! consume flag and JMS `appId` message selectors.
//!
//! Intended for integration tests and demos; nothing here touches a network.

pub mod amqp;
pub mod hub;
pub mod jms;

pub use amqp::LoopbackAmqpWire;
pub use hub::{BrokerHub, HubMessage, Selector, APP_ID_HEADER};
pub use jms::LoopbackJmsWire;
