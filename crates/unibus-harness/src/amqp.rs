//! Loopback AMQP wire
//!
//! Implements [`AmqpWire`] over the [`BrokerHub`]: exchanges, queues, and
//! bindings are plain in-memory records, and `basic.consume` becomes a hub
//! subscription keyed by exchange and routing key. Basic-properties survive
//! transit as hub headers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use unibus_amqp::{
    AmqpProperties, AmqpWire, AmqpWireEvent, ChannelId, ConnectOptions, ConsumeOptions, WireError,
    WireEventReceiver, WireEventSender,
};

use crate::hub::{BrokerHub, ConnectionId, HubMessage, APP_ID_HEADER};

fn amqp_topic(exchange: &str, routing_key: &str) -> String {
    format!("amqp:{exchange}:{routing_key}")
}

// ----------------------------------------------------------------------------
// Wire State
// ----------------------------------------------------------------------------

#[derive(Default)]
struct AmqpState {
    origin: Option<ConnectionId>,
    next_channel: u16,
    open_channels: HashSet<ChannelId>,
    exchanges: HashSet<String>,
    /// Queue name to its (exchange, routing key) bindings.
    queues: HashMap<String, Vec<(String, String)>>,
    /// Consumer tags in use on this connection.
    consumer_tags: HashSet<String>,
}

impl AmqpState {
    fn origin(&self) -> Result<ConnectionId, WireError> {
        self.origin
            .ok_or_else(|| WireError::new("operation", "not connected"))
    }

    fn require_channel(&self, channel: ChannelId) -> Result<(), WireError> {
        if self.open_channels.contains(&channel) {
            Ok(())
        } else {
            Err(WireError::new("channel", format!("{channel} is not open")))
        }
    }
}

// ----------------------------------------------------------------------------
// Loopback Wire
// ----------------------------------------------------------------------------

/// AMQP wire running against an in-process [`BrokerHub`].
pub struct LoopbackAmqpWire {
    hub: BrokerHub,
    state: Arc<StdMutex<AmqpState>>,
    events_tx: WireEventSender,
    events_rx: StdMutex<Option<WireEventReceiver>>,
    connect_failure: Option<String>,
    fail_next_close: AtomicBool,
}

impl LoopbackAmqpWire {
    pub fn new(hub: BrokerHub) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            hub,
            state: Arc::new(StdMutex::new(AmqpState::default())),
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

    /// Make the next `channel.close` fail once.
    pub fn with_close_failure(self) -> Self {
        self.fail_next_close.store(true, Ordering::SeqCst);
        self
    }
}

fn headers_from_properties(properties: &AmqpProperties) -> Vec<(String, String)> {
    let mut headers = vec![
        ("contentType".to_string(), properties.content_type.clone()),
        (
            "contentEncoding".to_string(),
            properties.content_encoding.clone(),
        ),
        (
            "deliveryMode".to_string(),
            properties.delivery_mode.to_string(),
        ),
        ("priority".to_string(), properties.priority.to_string()),
        ("messageId".to_string(), properties.message_id.clone()),
        ("timestamp".to_string(), properties.timestamp.to_string()),
        ("userId".to_string(), properties.user_id.clone()),
    ];
    if let Some(app_id) = &properties.app_id {
        headers.push((APP_ID_HEADER.to_string(), app_id.clone()));
    }
    headers
}

fn properties_from_headers(message: &HubMessage) -> AmqpProperties {
    AmqpProperties {
        content_type: message.header("contentType").unwrap_or("text/plain").to_string(),
        content_encoding: message.header("contentEncoding").unwrap_or("UTF-8").to_string(),
        delivery_mode: message
            .header("deliveryMode")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1),
        priority: message
            .header("priority")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        message_id: message.header("messageId").unwrap_or_default().to_string(),
        timestamp: message
            .header("timestamp")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        user_id: message.header("userId").unwrap_or_default().to_string(),
        app_id: message.header(APP_ID_HEADER).map(str::to_string),
    }
}

fn spawn_forwarder(
    mut deliveries: mpsc::UnboundedReceiver<HubMessage>,
    events_tx: WireEventSender,
    channel: ChannelId,
) {
    tokio::spawn(async move {
        while let Some(message) = deliveries.recv().await {
            let properties = properties_from_headers(&message);
            let event = AmqpWireEvent::Deliver {
                channel,
                body: message.body,
                properties,
            };
            if events_tx.send(event).is_err() {
                break;
            }
        }
    });
}

#[async_trait]
impl AmqpWire for LoopbackAmqpWire {
    fn take_events(&mut self) -> Option<WireEventReceiver> {
        self.events_rx.lock().unwrap().take()
    }

    async fn connect(&self, options: ConnectOptions) -> Result<(), WireError> {
        if let Some(reason) = &self.connect_failure {
            return Err(WireError::new("connect", reason.clone()));
        }
        if options.url.is_empty() {
            return Err(WireError::new("connect", "empty broker url"));
        }
        let mut state = self.state.lock().unwrap();
        state.origin = Some(self.hub.register_connection());
        debug!(url = %options.url, "Loopback AMQP connected");
        let _ = self.events_tx.send(AmqpWireEvent::Open);
        Ok(())
    }

    async fn open_channel(&self) -> Result<ChannelId, WireError> {
        let mut state = self.state.lock().unwrap();
        state.origin()?;
        state.next_channel += 1;
        let channel = ChannelId(state.next_channel);
        state.open_channels.insert(channel);
        Ok(channel)
    }

    async fn declare_exchange(
        &self,
        channel: ChannelId,
        exchange: &str,
        _exchange_type: &str,
    ) -> Result<(), WireError> {
        let mut state = self.state.lock().unwrap();
        state.require_channel(channel)?;
        state.exchanges.insert(exchange.to_string());
        Ok(())
    }

    async fn declare_queue(&self, channel: ChannelId, queue: &str) -> Result<(), WireError> {
        let mut state = self.state.lock().unwrap();
        state.require_channel(channel)?;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn bind_queue(
        &self,
        channel: ChannelId,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), WireError> {
        let mut state = self.state.lock().unwrap();
        state.require_channel(channel)?;
        if !state.exchanges.contains(exchange) {
            return Err(WireError::new(
                "queue.bind",
                format!("no such exchange: {exchange}"),
            ));
        }
        let Some(bindings) = state.queues.get_mut(queue) else {
            return Err(WireError::new(
                "queue.bind",
                format!("no such queue: {queue}"),
            ));
        };
        bindings.push((exchange.to_string(), routing_key.to_string()));
        Ok(())
    }

    async fn consume(
        &self,
        channel: ChannelId,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<(), WireError> {
        let mut state = self.state.lock().unwrap();
        state.require_channel(channel)?;
        let origin = state.origin()?;
        if options.consumer_tag.is_empty() {
            return Err(WireError::new("basic.consume", "empty consumer tag"));
        }
        if !state.consumer_tags.insert(options.consumer_tag.clone()) {
            return Err(WireError::new(
                "basic.consume",
                format!("consumer tag already in use: {}", options.consumer_tag),
            ));
        }
        let Some(bindings) = state.queues.get(queue) else {
            return Err(WireError::new(
                "basic.consume",
                format!("no such queue: {queue}"),
            ));
        };

        for (exchange, routing_key) in bindings {
            let deliveries = self.hub.subscribe(
                &amqp_topic(exchange, routing_key),
                origin,
                options.no_local,
                None,
            );
            spawn_forwarder(deliveries, self.events_tx.clone(), channel);
        }
        Ok(())
    }

    async fn publish(
        &self,
        channel: ChannelId,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        properties: AmqpProperties,
    ) -> Result<(), WireError> {
        let (origin, topic) = {
            let state = self.state.lock().unwrap();
            state.require_channel(channel)?;
            if !state.exchanges.contains(exchange) {
                return Err(WireError::new(
                    "basic.publish",
                    format!("no such exchange: {exchange}"),
                ));
            }
            (state.origin()?, amqp_topic(exchange, routing_key))
        };

        let mut message = HubMessage::new(body);
        message.headers = headers_from_properties(&properties);
        self.hub.publish(&topic, origin, message);
        Ok(())
    }

    async fn close_channel(&self, channel: ChannelId) -> Result<(), WireError> {
        if self.fail_next_close.swap(false, Ordering::SeqCst) {
            return Err(WireError::new("channel.close", "injected close failure"));
        }
        let mut state = self.state.lock().unwrap();
        state.require_channel(channel)?;
        state.open_channels.remove(&channel);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), WireError> {
        let origin = {
            let mut state = self.state.lock().unwrap();
            let origin = state.origin()?;
            state.origin = None;
            state.open_channels.clear();
            origin
        };
        self.hub.remove_connection(origin);
        let _ = self.events_tx.send(AmqpWireEvent::Closed);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
