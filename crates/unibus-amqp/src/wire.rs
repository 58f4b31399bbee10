//! AMQP wire abstraction
//!
//! [`AmqpWire`] is the seam between the backend's lifecycle logic and an
//! actual AMQP 0-9-1 protocol stack. Synchronous protocol replies (declare-ok,
//! bind-ok, consume-ok) complete the awaited call directly; everything the
//! broker pushes without being asked (connection loss, channel close,
//! flow control, deliveries) arrives on the wire event stream.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::WireError;

pub type WireEventSender = mpsc::UnboundedSender<AmqpWireEvent>;
pub type WireEventReceiver = mpsc::UnboundedReceiver<AmqpWireEvent>;

// ----------------------------------------------------------------------------
// Wire Types
// ----------------------------------------------------------------------------

/// Broker-assigned channel number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u16);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

/// Connection-open parameters.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub url: String,
    pub virtual_host: String,
    pub username: String,
    pub password: String,
}

/// Options for `basic.consume`.
///
/// `no_ack` and `no_local` are both set by the backend: deliveries are
/// fire-and-forget and the broker drops the consumer's own publishes. The
/// consumer tag carries the client's identity token; brokers that key
/// `no-local` on the tag rather than the connection need it.
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    pub consumer_tag: String,
    pub no_ack: bool,
    pub no_local: bool,
    pub exclusive: bool,
}

/// Basic-properties header attached to a published message.
#[derive(Debug, Clone)]
pub struct AmqpProperties {
    pub content_type: String,
    pub content_encoding: String,
    pub delivery_mode: u8,
    pub priority: u8,
    pub message_id: String,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: u64,
    pub user_id: String,
    pub app_id: Option<String>,
}

/// Asynchronous notifications pushed by the broker.
#[derive(Debug, Clone)]
pub enum AmqpWireEvent {
    /// Connection handshake completed.
    Open,
    /// Connection-level failure.
    Error { reason: String },
    /// Connection closed, by either side.
    Closed,
    /// `channel.close` initiated by the broker.
    ChannelError { channel: ChannelId, reason: String },
    ChannelClosed { channel: ChannelId },
    /// `channel.flow` from the broker.
    Flow { channel: ChannelId, active: bool },
    /// One `basic.deliver` with its properties.
    Deliver {
        channel: ChannelId,
        body: Vec<u8>,
        properties: AmqpProperties,
    },
}

// ----------------------------------------------------------------------------
// Wire Trait
// ----------------------------------------------------------------------------

/// One AMQP connection's worth of protocol operations.
///
/// Channel setup calls return once the broker replies `*-ok`; a protocol
/// rejection surfaces as the call's `WireError`.
#[async_trait]
pub trait AmqpWire: Send + Sync + 'static {
    /// Hand over the wire event stream. Yields `Some` exactly once.
    fn take_events(&mut self) -> Option<WireEventReceiver>;

    /// Start the connection handshake. [`AmqpWireEvent::Open`] follows on
    /// success, [`AmqpWireEvent::Error`] on asynchronous failure.
    async fn connect(&self, options: ConnectOptions) -> Result<(), WireError>;

    async fn open_channel(&self) -> Result<ChannelId, WireError>;

    async fn declare_exchange(
        &self,
        channel: ChannelId,
        exchange: &str,
        exchange_type: &str,
    ) -> Result<(), WireError>;

    async fn declare_queue(&self, channel: ChannelId, queue: &str) -> Result<(), WireError>;

    async fn bind_queue(
        &self,
        channel: ChannelId,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), WireError>;

    async fn consume(
        &self,
        channel: ChannelId,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<(), WireError>;

    async fn publish(
        &self,
        channel: ChannelId,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        properties: AmqpProperties,
    ) -> Result<(), WireError>;

    async fn close_channel(&self, channel: ChannelId) -> Result<(), WireError>;

    async fn disconnect(&self) -> Result<(), WireError>;
}
