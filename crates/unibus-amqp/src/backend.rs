//! AMQP backend implementation
//!
//! Maps the unified topology onto AMQP primitives: the publish topic becomes
//! a fanout exchange, the subscribe side a private queue bound to that
//! exchange. Echo suppression uses the broker's `no-local` consume flag, so
//! the core never needs to compare correlation tags for this backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use unibus_core::{
    Backend, BackendCapabilities, BackendEvent, BodyEncoding, ChannelError, ChannelKind,
    ClientConfig, ClientError, ClientIdentity, CloseReport, ConnectionError, Credentials,
    EventReceiver, EventSender, MessageEnvelope, Result, Topology, WireBody,
};

use crate::wire::{
    AmqpProperties, AmqpWire, AmqpWireEvent, ChannelId, ConnectOptions, ConsumeOptions,
    WireEventReceiver,
};

/// Default AMQP virtual host.
pub const VIRTUAL_HOST: &str = "/";

/// Exchange type used for the publish topic.
pub const EXCHANGE_TYPE: &str = "fanout";

// ----------------------------------------------------------------------------
// Backend
// ----------------------------------------------------------------------------

/// AMQP backend over an [`AmqpWire`] protocol stack.
pub struct AmqpBackend<W: AmqpWire> {
    wire: Arc<W>,
    wire_events: Option<WireEventReceiver>,
    events_tx: EventSender,
    events_rx: Option<EventReceiver>,
    /// Channel number to lifecycle role, shared with the pump task.
    channel_kinds: Arc<StdMutex<HashMap<ChannelId, ChannelKind>>>,
    publish_channel: Option<ChannelId>,
    consume_channel: Option<ChannelId>,
    exchange: Option<String>,
    routing_key: Option<String>,
    pump: Option<JoinHandle<()>>,
}

impl<W: AmqpWire> AmqpBackend<W> {
    pub fn new(wire: W) -> Self {
        Self::with_config(wire, ClientConfig::default())
    }

    pub fn with_config(mut wire: W, config: ClientConfig) -> Self {
        let wire_events = wire.take_events();
        let (events_tx, events_rx) = tokio::sync::mpsc::channel(config.event_buffer_size);
        Self {
            wire: Arc::new(wire),
            wire_events,
            events_tx,
            events_rx: Some(events_rx),
            channel_kinds: Arc::new(StdMutex::new(HashMap::new())),
            publish_channel: None,
            consume_channel: None,
            exchange: None,
            routing_key: None,
            pump: None,
        }
    }

    fn register_channel(&self, channel: ChannelId, kind: ChannelKind) {
        self.channel_kinds.lock().unwrap().insert(channel, kind);
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

#[async_trait]
impl<W: AmqpWire> Backend for AmqpBackend<W> {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "amqp",
            broker_side_echo_filter: true,
            body_encoding: BodyEncoding::Binary,
        }
    }

    async fn connect(&mut self, credentials: &Credentials) -> Result<()> {
        let wire_events = self.wire_events.take().ok_or_else(|| {
            ClientError::Channel(ChannelError::EventStreamUnavailable)
        })?;
        self.pump = Some(tokio::spawn(pump(
            wire_events,
            self.events_tx.clone(),
            Arc::clone(&self.channel_kinds),
        )));

        let options = ConnectOptions {
            url: credentials.url.clone(),
            virtual_host: VIRTUAL_HOST.to_string(),
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

        let channel = self.wire.open_channel().await.map_err(setup)?;
        self.register_channel(channel, ChannelKind::Publish);
        debug!(%channel, exchange = %topology.publish_topic, "Declaring exchange");
        self.wire
            .declare_exchange(channel, &topology.publish_topic, EXCHANGE_TYPE)
            .await
            .map_err(setup)?;
        info!("EXCHANGE DECLARED: {}", topology.publish_topic);

        self.publish_channel = Some(channel);
        self.exchange = Some(topology.publish_topic.clone());
        self.routing_key = Some(topology.routing_key.clone());
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

        let channel = self.wire.open_channel().await.map_err(setup)?;
        self.register_channel(channel, ChannelKind::Subscribe);
        let queue = identity.queue_name();

        debug!(%channel, queue, "Declaring private queue");
        self.wire.declare_queue(channel, queue).await.map_err(setup)?;
        info!("QUEUE DECLARED: {queue}");
        self.wire
            .bind_queue(channel, queue, &topology.subscribe_topic, &topology.routing_key)
            .await
            .map_err(setup)?;
        info!("QUEUE BOUND: {queue} to {}", topology.subscribe_topic);
        self.wire
            .consume(
                channel,
                queue,
                ConsumeOptions {
                    consumer_tag: identity.token().to_string(),
                    no_ack: true,
                    no_local: topology.suppress_echo,
                    exclusive: false,
                },
            )
            .await
            .map_err(setup)?;
        info!("CONSUME FROM QUEUE: {queue}");

        self.consume_channel = Some(channel);
        self.signal_ready(BackendEvent::ConsumeReady);
        Ok(())
    }

    async fn publish(&mut self, envelope: MessageEnvelope) -> Result<()> {
        let (Some(channel), Some(exchange), Some(routing_key)) = (
            self.publish_channel,
            self.exchange.as_deref(),
            self.routing_key.as_deref(),
        ) else {
            return Err(ClientError::publish_failed("publish channel not open"));
        };

        let body = match envelope.body {
            WireBody::Binary(bytes) => bytes,
            WireBody::Text(text) => text.into_bytes(),
        };
        let properties = AmqpProperties {
            content_type: envelope.content_type.to_string(),
            content_encoding: envelope.content_encoding.to_string(),
            delivery_mode: envelope.delivery_mode.wire_value(),
            priority: envelope.priority,
            message_id: envelope.message_id,
            timestamp: envelope.timestamp,
            user_id: envelope.sender_id,
            app_id: envelope.correlation_tag,
        };

        self.wire
            .publish(channel, exchange, routing_key, body, properties)
            .await
            .map_err(|err| ClientError::publish_failed(err.to_string()))
    }

    async fn close(&mut self) -> CloseReport {
        let mut report = CloseReport::default();

        if let Some(channel) = self.consume_channel.take() {
            let result = self.wire.close_channel(channel).await;
            report.record("consume channel", result.map_err(|e| e.to_string()));
        }
        if let Some(channel) = self.publish_channel.take() {
            let result = self.wire.close_channel(channel).await;
            report.record("publish channel", result.map_err(|e| e.to_string()));
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

/// Translate wire notifications into backend events until either side closes.
async fn pump(
    mut wire_events: WireEventReceiver,
    events_tx: EventSender,
    channel_kinds: Arc<StdMutex<HashMap<ChannelId, ChannelKind>>>,
) {
    while let Some(event) = wire_events.recv().await {
        let translated = match event {
            AmqpWireEvent::Open => BackendEvent::TransportOpen,
            AmqpWireEvent::Error { reason } => BackendEvent::TransportError { reason },
            AmqpWireEvent::Closed => BackendEvent::TransportClosed,
            AmqpWireEvent::ChannelError { channel, reason } => {
                let Some(kind) = channel_kinds.lock().unwrap().get(&channel).copied() else {
                    warn!(%channel, "Error on unknown channel");
                    continue;
                };
                BackendEvent::ChannelError {
                    channel: kind,
                    reason,
                }
            }
            AmqpWireEvent::ChannelClosed { channel } => {
                let Some(kind) = channel_kinds.lock().unwrap().get(&channel).copied() else {
                    warn!(%channel, "Close on unknown channel");
                    continue;
                };
                BackendEvent::ChannelClosed { channel: kind }
            }
            AmqpWireEvent::Flow { active, .. } => BackendEvent::Flow { active },
            AmqpWireEvent::Deliver {
                body, properties, ..
            } => BackendEvent::Delivery {
                body: WireBody::Binary(body),
                correlation_tag: properties.app_id,
            },
        };
        if events_tx.send(translated).await.is_err() {
            break;
        }
    }
    debug!("AMQP event pump finished");
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WireError;
    // shadow the re-exported unibus_core::Result alias for the wire impls
    use std::result::Result;
    use std::sync::atomic::{AtomicU16, Ordering};
    use tokio::sync::mpsc;
    use unibus_core::UniversalClient;

    /// Records every wire call and answers them all with success.
    struct RecordingWire {
        calls: Arc<StdMutex<Vec<String>>>,
        published: Arc<StdMutex<Vec<(String, Vec<u8>, AmqpProperties)>>>,
        next_channel: AtomicU16,
        events: StdMutex<Option<WireEventReceiver>>,
        _events_tx: crate::WireEventSender,
    }

    impl RecordingWire {
        fn new() -> (Self, Arc<StdMutex<Vec<String>>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let calls = Arc::new(StdMutex::new(Vec::new()));
            let wire = Self {
                calls: Arc::clone(&calls),
                published: Arc::new(StdMutex::new(Vec::new())),
                next_channel: AtomicU16::new(1),
                events: StdMutex::new(Some(rx)),
                _events_tx: tx,
            };
            (wire, calls)
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl AmqpWire for RecordingWire {
        fn take_events(&mut self) -> Option<WireEventReceiver> {
            self.events.lock().unwrap().take()
        }

        async fn connect(&self, options: ConnectOptions) -> Result<(), WireError> {
            self.record(format!("connect {} vh={}", options.url, options.virtual_host));
            Ok(())
        }

        async fn open_channel(&self) -> Result<ChannelId, WireError> {
            let id = ChannelId(self.next_channel.fetch_add(1, Ordering::SeqCst));
            self.record(format!("open {id}"));
            Ok(id)
        }

        async fn declare_exchange(
            &self,
            channel: ChannelId,
            exchange: &str,
            exchange_type: &str,
        ) -> Result<(), WireError> {
            self.record(format!("declare-exchange {channel} {exchange} {exchange_type}"));
            Ok(())
        }

        async fn declare_queue(&self, channel: ChannelId, queue: &str) -> Result<(), WireError> {
            self.record(format!("declare-queue {channel} {queue}"));
            Ok(())
        }

        async fn bind_queue(
            &self,
            channel: ChannelId,
            queue: &str,
            exchange: &str,
            routing_key: &str,
        ) -> Result<(), WireError> {
            self.record(format!("bind {channel} {queue} {exchange} {routing_key}"));
            Ok(())
        }

        async fn consume(
            &self,
            channel: ChannelId,
            queue: &str,
            options: ConsumeOptions,
        ) -> Result<(), WireError> {
            self.record(format!(
                "consume {channel} {queue} tag={} no_ack={} no_local={}",
                options.consumer_tag, options.no_ack, options.no_local
            ));
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
            self.record(format!("publish {channel} {exchange} {routing_key}"));
            self.published
                .lock()
                .unwrap()
                .push((exchange.to_string(), body, properties));
            Ok(())
        }

        async fn close_channel(&self, channel: ChannelId) -> Result<(), WireError> {
            self.record(format!("close {channel}"));
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), WireError> {
            self.record("disconnect".to_string());
            Ok(())
        }
    }

    fn topology() -> Topology {
        Topology::new("news", "news", true)
    }

    async fn connected_backend() -> (AmqpBackend<RecordingWire>, Arc<StdMutex<Vec<String>>>) {
        let (wire, calls) = RecordingWire::new();
        let mut backend = AmqpBackend::new(wire);
        let _events = backend.take_events().unwrap();
        backend
            .connect(&Credentials::new("ws://broker.test/amqp", "guest", "guest"))
            .await
            .unwrap();
        (backend, calls)
    }

    #[tokio::test]
    async fn publish_setup_declares_fanout_exchange() {
        let (mut backend, calls) = connected_backend().await;
        backend.open_publish(&topology()).await.unwrap();

        let calls = calls.lock().unwrap();
        assert!(calls.contains(&"declare-exchange channel-1 news fanout".to_string()));
    }

    #[tokio::test]
    async fn subscribe_setup_runs_declare_bind_consume_in_order() {
        let (mut backend, calls) = connected_backend().await;
        backend.open_publish(&topology()).await.unwrap();

        let identity = ClientIdentity::generate();
        backend.open_subscribe(&topology(), &identity).await.unwrap();

        let queue = identity.queue_name();
        let calls = calls.lock().unwrap();
        let tail: Vec<_> = calls.iter().skip(3).cloned().collect();
        assert_eq!(
            tail,
            vec![
                "open channel-2".to_string(),
                format!("declare-queue channel-2 {queue}"),
                format!("bind channel-2 {queue} news broadcastkey"),
                format!(
                    "consume channel-2 {queue} tag={} no_ack=true no_local=true",
                    identity.token()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn publish_maps_envelope_onto_basic_properties() {
        let (mut backend, _calls) = connected_backend().await;
        backend.open_publish(&topology()).await.unwrap();

        let envelope = MessageEnvelope::new(
            WireBody::Binary(b"{\"type\":\"ping\"}".to_vec()),
            "42".to_string(),
            "guest".to_string(),
            Some("token-a".to_string()),
        );
        backend.publish(envelope).await.unwrap();

        let published = backend.wire.published.lock().unwrap();
        let (exchange, body, properties) = &published[0];
        assert_eq!(exchange, "news");
        assert_eq!(body, b"{\"type\":\"ping\"}");
        assert_eq!(properties.content_type, "text/plain");
        assert_eq!(properties.content_encoding, "UTF-8");
        assert_eq!(properties.delivery_mode, 1);
        assert_eq!(properties.priority, 6);
        assert_eq!(properties.message_id, "42");
        assert_eq!(properties.user_id, "guest");
        assert_eq!(properties.app_id.as_deref(), Some("token-a"));
    }

    #[tokio::test]
    async fn publish_without_open_channel_fails() {
        let (mut backend, _calls) = connected_backend().await;
        let envelope = MessageEnvelope::new(
            WireBody::Binary(Vec::new()),
            "1".to_string(),
            "guest".to_string(),
            None,
        );
        assert!(backend.publish(envelope).await.is_err());
    }

    #[tokio::test]
    async fn close_cascades_consumer_then_producer_then_connection() {
        let (mut backend, calls) = connected_backend().await;
        backend.open_publish(&topology()).await.unwrap();
        backend
            .open_subscribe(&topology(), &ClientIdentity::generate())
            .await
            .unwrap();

        let report = backend.close().await;
        assert!(report.all_closed());

        let calls = calls.lock().unwrap();
        let tail: Vec<_> = calls.iter().rev().take(3).rev().cloned().collect();
        assert_eq!(
            tail,
            vec![
                "close channel-2".to_string(),
                "close channel-1".to_string(),
                "disconnect".to_string(),
            ]
        );
    }

    /// Wire whose consume call floods the event stream before returning,
    /// like a broker flushing a queue backlog the moment the consumer
    /// registers.
    struct BurstWire {
        burst: usize,
        events_tx: crate::WireEventSender,
        events: StdMutex<Option<WireEventReceiver>>,
        next_channel: AtomicU16,
    }

    impl BurstWire {
        fn new(burst: usize) -> Self {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            Self {
                burst,
                events_tx,
                events: StdMutex::new(Some(events_rx)),
                next_channel: AtomicU16::new(1),
            }
        }
    }

    #[async_trait]
    impl AmqpWire for BurstWire {
        fn take_events(&mut self) -> Option<WireEventReceiver> {
            self.events.lock().unwrap().take()
        }

        async fn connect(&self, _options: ConnectOptions) -> Result<(), WireError> {
            let _ = self.events_tx.send(AmqpWireEvent::Open);
            Ok(())
        }

        async fn open_channel(&self) -> Result<ChannelId, WireError> {
            Ok(ChannelId(self.next_channel.fetch_add(1, Ordering::SeqCst)))
        }

        async fn declare_exchange(
            &self,
            _channel: ChannelId,
            _exchange: &str,
            _exchange_type: &str,
        ) -> Result<(), WireError> {
            Ok(())
        }

        async fn declare_queue(&self, _channel: ChannelId, _queue: &str) -> Result<(), WireError> {
            Ok(())
        }

        async fn bind_queue(
            &self,
            _channel: ChannelId,
            _queue: &str,
            _exchange: &str,
            _routing_key: &str,
        ) -> Result<(), WireError> {
            Ok(())
        }

        async fn consume(
            &self,
            channel: ChannelId,
            _queue: &str,
            _options: ConsumeOptions,
        ) -> Result<(), WireError> {
            for n in 0..self.burst {
                let _ = self.events_tx.send(AmqpWireEvent::Deliver {
                    channel,
                    body: format!("backlog {n}").into_bytes(),
                    properties: AmqpProperties {
                        content_type: "text/plain".to_string(),
                        content_encoding: "UTF-8".to_string(),
                        delivery_mode: 1,
                        priority: 6,
                        message_id: n.to_string(),
                        timestamp: 1,
                        user_id: "guest".to_string(),
                        app_id: None,
                    },
                });
            }
            Ok(())
        }

        async fn publish(
            &self,
            _channel: ChannelId,
            _exchange: &str,
            _routing_key: &str,
            _body: Vec<u8>,
            _properties: AmqpProperties,
        ) -> Result<(), WireError> {
            Ok(())
        }

        async fn close_channel(&self, _channel: ChannelId) -> Result<(), WireError> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), WireError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivery_backlog_at_consume_time_does_not_stall_readiness() {
        use std::time::Duration;

        let backend = AmqpBackend::new(BurstWire::new(80));
        let mut client = UniversalClient::new(backend);
        let received = Arc::new(StdMutex::new(0usize));
        let sink = Arc::clone(&received);
        client
            .connect(
                Credentials::new("ws://broker.test/amqp", "guest", "guest"),
                topology(),
                move |_payload| *sink.lock().unwrap() += 1,
            )
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                if client.state_name().await == "Ready" {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("readiness stalled behind the delivery backlog");

        tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                if *received.lock().unwrap() == 80 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("backlog was not delivered");
    }

    /// Thread-local subscriber recording every event's level and message.
    struct LogSink {
        events: Arc<StdMutex<Vec<(tracing::Level, String)>>>,
    }

    struct MessageVisitor<'a>(&'a mut String);

    impl tracing::field::Visit for MessageVisitor<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                use std::fmt::Write;
                let _ = write!(self.0, "{value:?}");
            }
        }
    }

    impl tracing::Subscriber for LogSink {
        fn enabled(&self, _metadata: &tracing::Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, _span: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            tracing::span::Id::from_u64(1)
        }

        fn record(&self, _span: &tracing::span::Id, _values: &tracing::span::Record<'_>) {}

        fn record_follows_from(&self, _span: &tracing::span::Id, _follows: &tracing::span::Id) {}

        fn event(&self, event: &tracing::Event<'_>) {
            let mut message = String::new();
            event.record(&mut MessageVisitor(&mut message));
            self.events
                .lock()
                .unwrap()
                .push((*event.metadata().level(), message));
        }

        fn enter(&self, _span: &tracing::span::Id) {}

        fn exit(&self, _span: &tracing::span::Id) {}
    }

    #[tokio::test]
    async fn topology_milestones_are_logged_at_info() {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let _guard = tracing::subscriber::set_default(LogSink {
            events: Arc::clone(&events),
        });

        let (mut backend, _calls) = connected_backend().await;
        backend.open_publish(&topology()).await.unwrap();
        backend
            .open_subscribe(&topology(), &ClientIdentity::generate())
            .await
            .unwrap();

        let infos: Vec<String> = events
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, _)| *level == tracing::Level::INFO)
            .map(|(_, message)| message.clone())
            .collect();
        assert!(infos.iter().any(|m| m == "EXCHANGE DECLARED: news"));
        assert!(infos.iter().any(|m| m.starts_with("QUEUE DECLARED: client")));
        assert!(infos.iter().any(|m| m.contains("QUEUE BOUND")));
        assert!(infos.iter().any(|m| m.starts_with("CONSUME FROM QUEUE: client")));
    }
}
