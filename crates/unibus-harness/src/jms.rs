//! Loopback JMS wire
//!
//! Implements [`JmsWire`] over the [`BrokerHub`]: topics map straight onto
//! hub topics, and consumer selectors are parsed and enforced by the hub,
//! matching where a real provider evaluates them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use unibus_jms::{
    ConnectOptions, JmsWire, JmsWireEvent, TextMessage, WireError, WireEventReceiver,
    WireEventSender,
};

use crate::hub::{BrokerHub, ConnectionId, HubMessage, Selector};

fn jms_topic(name: &str) -> String {
    format!("jms:{name}")
}

// ----------------------------------------------------------------------------
// Wire State
// ----------------------------------------------------------------------------

#[derive(Default)]
struct JmsState {
    origin: Option<ConnectionId>,
    session_open: bool,
    producer_topic: Option<String>,
    consumer_open: bool,
}

impl JmsState {
    fn origin(&self) -> Result<ConnectionId, WireError> {
        self.origin
            .ok_or_else(|| WireError::new("operation", "not connected"))
    }

    fn require_session(&self) -> Result<(), WireError> {
        if self.session_open {
            Ok(())
        } else {
            Err(WireError::new("session", "no open session"))
        }
    }
}

// ----------------------------------------------------------------------------
// Loopback Wire
// ----------------------------------------------------------------------------

/// JMS wire running against an in-process [`BrokerHub`].
pub struct LoopbackJmsWire {
    hub: BrokerHub,
    state: Arc<StdMutex<JmsState>>,
    events_tx: WireEventSender,
    events_rx: StdMutex<Option<WireEventReceiver>>,
    connect_failure: Option<String>,
    fail_next_close: AtomicBool,
}

impl LoopbackJmsWire {
    pub fn new(hub: BrokerHub) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            hub,
            state: Arc::new(StdMutex::new(JmsState::default())),
            events_tx,
            events_rx: StdMutex::new(Some(events_rx)),
            connect_failure: None,
            fail_next_close: AtomicBool::new(false),
        }
    }

    /// Make the connect call fail with the given reason.
    pub fn with_connect_failure<R: Into<String>>(mut self, reason: R) -> Self {
        self.connect_failure = Some(reason.into());
        self
    }

    /// Make the next close call fail once.
    pub fn with_close_failure(self) -> Self {
        self.fail_next_close.store(true, Ordering::SeqCst);
        self
    }

    fn check_close_failure(&self, operation: &'static str) -> Result<(), WireError> {
        if self.fail_next_close.swap(false, Ordering::SeqCst) {
            Err(WireError::new(operation, "injected close failure"))
        } else {
            Ok(())
        }
    }
}

fn spawn_forwarder(mut deliveries: mpsc::UnboundedReceiver<HubMessage>, events_tx: WireEventSender) {
    tokio::spawn(async move {
        while let Some(message) = deliveries.recv().await {
            let text = TextMessage {
                body: String::from_utf8_lossy(&message.body).into_owned(),
                properties: message.headers,
            };
            if events_tx.send(JmsWireEvent::Message(text)).is_err() {
                break;
            }
        }
    });
}

#[async_trait]
impl JmsWire for LoopbackJmsWire {
    fn take_events(&mut self) -> Option<WireEventReceiver> {
        self.events_rx.lock().unwrap().take()
    }

    async fn connect(&self, options: ConnectOptions) -> Result<(), WireError> {
        if let Some(reason) = &self.connect_failure {
            return Err(WireError::new("connect", reason.clone()));
        }
        if options.url.is_empty() {
            return Err(WireError::new("connect", "empty provider url"));
        }
        let mut state = self.state.lock().unwrap();
        state.origin = Some(self.hub.register_connection());
        debug!(url = %options.url, "Loopback JMS connected");
        let _ = self.events_tx.send(JmsWireEvent::Started);
        Ok(())
    }

    async fn create_session(&self) -> Result<(), WireError> {
        let mut state = self.state.lock().unwrap();
        state.origin()?;
        state.session_open = true;
        Ok(())
    }

    async fn create_producer(&self, topic: &str) -> Result<(), WireError> {
        let mut state = self.state.lock().unwrap();
        state.require_session()?;
        state.producer_topic = Some(topic.to_string());
        Ok(())
    }

    async fn create_consumer(&self, topic: &str, selector: Option<&str>) -> Result<(), WireError> {
        let parsed = selector
            .map(Selector::parse)
            .transpose()
            .map_err(|reason| WireError::new("create-consumer", reason))?;

        let mut state = self.state.lock().unwrap();
        state.require_session()?;
        let origin = state.origin()?;
        let deliveries = self.hub.subscribe(&jms_topic(topic), origin, false, parsed);
        spawn_forwarder(deliveries, self.events_tx.clone());
        state.consumer_open = true;
        Ok(())
    }

    async fn send(&self, message: TextMessage) -> Result<(), WireError> {
        let (origin, topic) = {
            let state = self.state.lock().unwrap();
            let Some(topic) = state.producer_topic.clone() else {
                return Err(WireError::new("send", "no producer"));
            };
            (state.origin()?, topic)
        };

        let mut hub_message = HubMessage::new(message.body.into_bytes());
        hub_message.headers = message.properties;
        self.hub.publish(&jms_topic(&topic), origin, hub_message);
        Ok(())
    }

    async fn close_consumer(&self) -> Result<(), WireError> {
        self.check_close_failure("close-consumer")?;
        self.state.lock().unwrap().consumer_open = false;
        Ok(())
    }

    async fn close_producer(&self) -> Result<(), WireError> {
        self.check_close_failure("close-producer")?;
        self.state.lock().unwrap().producer_topic = None;
        Ok(())
    }

    async fn close_session(&self) -> Result<(), WireError> {
        self.check_close_failure("close-session")?;
        self.state.lock().unwrap().session_open = false;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), WireError> {
        let origin = {
            let mut state = self.state.lock().unwrap();
            let origin = state.origin()?;
            *state = JmsState::default();
            origin
        };
        self.hub.remove_connection(origin);
        let _ = self.events_tx.send(JmsWireEvent::Closed);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
