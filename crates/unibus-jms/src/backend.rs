//! JMS backend implementation
//!
//! Maps the unified topology onto JMS primitives: one session, a producer on
//! the publish topic, and a consumer on the subscribe topic. Echo suppression
//! is a broker-evaluated message selector over the `appId` string property
//! stamped on every outgoing message.

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;
use unibus_core::{
    Backend, BackendCapabilities, BackendEvent, BodyEncoding, ChannelError, ClientConfig,
    ClientError, ClientIdentity, CloseReport, ConnectionError, Credentials, EventReceiver,
    EventSender, MessageEnvelope, Result, Topology, WireBody,
};

use crate::wire::{ConnectOptions, JmsWire, JmsWireEvent, TextMessage, WireEventReceiver};

/// String property carrying the sender's identity token.
pub const APP_ID_PROPERTY: &str = "appId";

// ----------------------------------------------------------------------------
// Backend
// ----------------------------------------------------------------------------

/// JMS backend over a [`JmsWire`] provider stack.
pub struct JmsBackend<W: JmsWire> {
    wire: std::sync::Arc<W>,
    wire_events: Option<WireEventReceiver>,
    events_tx: EventSender,
    events_rx: Option<EventReceiver>,
    session_open: bool,
    producer_open: bool,
    consumer_open: bool,
    pump: Option<JoinHandle<()>>,
}

impl<W: JmsWire> JmsBackend<W> {
    pub fn new(wire: W) -> Self {
        Self::with_config(wire, ClientConfig::default())
    }

    pub fn with_config(mut wire: W, config: ClientConfig) -> Self {
        let wire_events = wire.take_events();
        let (events_tx, events_rx) = tokio::sync::mpsc::channel(config.event_buffer_size);
        Self {
            wire: std::sync::Arc::new(wire),
            wire_events,
            events_tx,
            events_rx: Some(events_rx),
            session_open: false,
            producer_open: false,
            consumer_open: false,
            pump: None,
        }
    }

    /// Queue a readiness signal without waiting for channel capacity.
    ///
    /// The open calls run on the driver task, which is also the event
    /// stream's only consumer; an awaited send here wedges the client as
    /// soon as the pump has filled the buffer with deliveries.
    fn signal_ready(&self, event: BackendEvent) {
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let _ = events_tx.send(event).await;
        });
    }
}

/// Selector excluding messages whose `appId` equals the given token.
fn echo_selector(token: &str) -> String {
    format!("{APP_ID_PROPERTY}<>'{token}'")
}

#[async_trait]
impl<W: JmsWire> Backend for JmsBackend<W> {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "jms",
            broker_side_echo_filter: true,
            body_encoding: BodyEncoding::Text,
        }
    }

    async fn connect(&mut self, credentials: &Credentials) -> Result<()> {
        let wire_events = self
            .wire_events
            .take()
            .ok_or(ClientError::Channel(ChannelError::EventStreamUnavailable))?;
        self.pump = Some(tokio::spawn(pump(wire_events, self.events_tx.clone())));

        let options = ConnectOptions {
            url: credentials.url.clone(),
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        };
        self.wire.connect(options).await.map_err(|err| {
            ClientError::Connection(ConnectionError::TransportFailed {
                reason: err.to_string(),
            })
        })
    }

    async fn open_publish(&mut self, topology: &Topology) -> Result<()> {
        let setup = |err: crate::WireError| {
            ClientError::Channel(ChannelError::PublishSetup {
                reason: err.to_string(),
            })
        };

        if !self.session_open {
            self.wire.create_session().await.map_err(setup)?;
            self.session_open = true;
        }
        debug!(topic = %topology.publish_topic, "Creating producer");
        self.wire
            .create_producer(&topology.publish_topic)
            .await
            .map_err(setup)?;

        self.producer_open = true;
        self.signal_ready(BackendEvent::PublishReady);
        Ok(())
    }

    async fn open_subscribe(
        &mut self,
        topology: &Topology,
        identity: &ClientIdentity,
    ) -> Result<()> {
        let setup = |err: crate::WireError| {
            ClientError::Channel(ChannelError::SubscribeSetup {
                reason: err.to_string(),
            })
        };

        if !self.session_open {
            self.wire.create_session().await.map_err(setup)?;
            self.session_open = true;
        }
        let selector = topology
            .suppress_echo
            .then(|| echo_selector(identity.token()));
        debug!(
            topic = %topology.subscribe_topic,
            selector = selector.as_deref().unwrap_or("<none>"),
            "Creating consumer"
        );
        self.wire
            .create_consumer(&topology.subscribe_topic, selector.as_deref())
            .await
            .map_err(setup)?;

        self.consumer_open = true;
        self.signal_ready(BackendEvent::ConsumeReady);
        Ok(())
    }

    async fn publish(&mut self, envelope: MessageEnvelope) -> Result<()> {
        if !self.producer_open {
            return Err(ClientError::publish_failed("producer not open"));
        }

        let body = match envelope.body {
            WireBody::Text(text) => text,
            WireBody::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        };
        let mut message = TextMessage::new(body);
        if let Some(tag) = envelope.correlation_tag {
            message = message.with_property(APP_ID_PROPERTY, tag);
        }

        self.wire
            .send(message)
            .await
            .map_err(|err| ClientError::publish_failed(err.to_string()))
    }

    async fn close(&mut self) -> CloseReport {
        let mut report = CloseReport::default();

        if std::mem::take(&mut self.consumer_open) {
            let result = self.wire.close_consumer().await;
            report.record("consumer", result.map_err(|e| e.to_string()));
        }
        if std::mem::take(&mut self.producer_open) {
            let result = self.wire.close_producer().await;
            report.record("producer", result.map_err(|e| e.to_string()));
        }
        if std::mem::take(&mut self.session_open) {
            let result = self.wire.close_session().await;
            report.record("session", result.map_err(|e| e.to_string()));
        }
        let result = self.wire.disconnect().await;
        report.record("connection", result.map_err(|e| e.to_string()));

        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        report
    }

    fn take_events(&mut self) -> Option<EventReceiver> {
        self.events_rx.take()
    }
}

// ----------------------------------------------------------------------------
// Event Pump
// ----------------------------------------------------------------------------

/// Translate provider notifications into backend events.
async fn pump(mut wire_events: WireEventReceiver, events_tx: EventSender) {
    while let Some(event) = wire_events.recv().await {
        let translated = match event {
            JmsWireEvent::Started => BackendEvent::TransportOpen,
            JmsWireEvent::Error { reason } => BackendEvent::TransportError { reason },
            JmsWireEvent::Closed => BackendEvent::TransportClosed,
            JmsWireEvent::Message(message) => {
                let correlation_tag = message.property(APP_ID_PROPERTY).map(str::to_string);
                BackendEvent::Delivery {
                    body: WireBody::Text(message.body),
                    correlation_tag,
                }
            }
        };
        if events_tx.send(translated).await.is_err() {
            break;
        }
    }
    debug!("JMS event pump finished");
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
