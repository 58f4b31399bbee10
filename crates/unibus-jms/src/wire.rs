//! JMS wire abstraction
//!
//! [`JmsWire`] models the provider-side API surface the backend consumes:
//! connection, session, producer, and consumer creation as awaited calls,
//! with exception-listener callbacks and inbound messages arriving on the
//! wire event stream.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::WireError;

pub type WireEventSender = mpsc::UnboundedSender<JmsWireEvent>;
pub type WireEventReceiver = mpsc::UnboundedReceiver<JmsWireEvent>;

// ----------------------------------------------------------------------------
// Wire Types
// ----------------------------------------------------------------------------

/// Connection-factory parameters.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// A text message with its string properties.
#[derive(Debug, Clone)]
pub struct TextMessage {
    pub body: String,
    /// String properties in set order. The unibus backends only ever set
    /// `appId`, but the wire carries arbitrary properties like a real
    /// provider would.
    pub properties: Vec<(String, String)>,
}

impl TextMessage {
    pub fn new<B: Into<String>>(body: B) -> Self {
        Self {
            body: body.into(),
            properties: Vec::new(),
        }
    }

    pub fn with_property<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Asynchronous notifications from the provider.
#[derive(Debug, Clone)]
pub enum JmsWireEvent {
    /// The connection is started and delivering.
    Started,
    /// Exception-listener callback.
    Error { reason: String },
    /// Connection closed, by either side.
    Closed,
    /// One inbound message from the consumer.
    Message(TextMessage),
}

// ----------------------------------------------------------------------------
// Wire Trait
// ----------------------------------------------------------------------------

/// One JMS connection's worth of provider operations.
///
/// Creation calls return once the provider acknowledges; a provider
/// rejection surfaces as the call's `WireError`.
#[async_trait]
pub trait JmsWire: Send + Sync + 'static {
    /// Hand over the wire event stream. Yields `Some` exactly once.
    fn take_events(&mut self) -> Option<WireEventReceiver>;

    /// Create the connection and start delivery. [`JmsWireEvent::Started`]
    /// follows on success.
    async fn connect(&self, options: ConnectOptions) -> Result<(), WireError>;

    async fn create_session(&self) -> Result<(), WireError>;

    async fn create_producer(&self, topic: &str) -> Result<(), WireError>;

    /// Create a consumer on the topic, optionally filtered by a message
    /// selector evaluated broker-side.
    async fn create_consumer(&self, topic: &str, selector: Option<&str>) -> Result<(), WireError>;

    async fn send(&self, message: TextMessage) -> Result<(), WireError>;

    async fn close_consumer(&self) -> Result<(), WireError>;

    async fn close_producer(&self) -> Result<(), WireError>;

    async fn close_session(&self) -> Result<(), WireError>;

    async fn disconnect(&self) -> Result<(), WireError>;
}
