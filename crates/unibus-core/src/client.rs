//! Universal pub/sub client
//!
//! [`UniversalClient`] implements the connection lifecycle exactly once
//! against the [`Backend`] capability trait. All broker interaction
//! completes through the backend event stream, consumed by a single spawned
//! driver task; the identity, topology, and state live behind one mutex so
//! every transition is serialized regardless of who calls into the client.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, BackendEvent, CloseReport, EventReceiver};
use crate::envelope::{self, MessageEnvelope, Payload, WireBody};
use crate::errors::{ChannelError, Result, UsageError};
use crate::filter;
use crate::identity::ClientIdentity;
use crate::state::{ConnectionState, FailedState, LifecycleEvent, StateTransitionError};
use crate::topology::{Credentials, Topology};

/// Callback invoked with every delivered message.
pub type MessageHandler = Arc<dyn Fn(Payload) + Send + Sync>;

// ----------------------------------------------------------------------------
// Universal Client
// ----------------------------------------------------------------------------

/// One client instance over a backend adapter.
///
/// Distinct instances are fully independent and share nothing.
pub struct UniversalClient<B: Backend> {
    inner: Arc<Mutex<Inner<B>>>,
    driver: Option<JoinHandle<()>>,
}

struct Inner<B: Backend> {
    identity: ClientIdentity,
    state: ConnectionState,
    topology: Option<Topology>,
    sender_id: Option<String>,
    backend: B,
    on_message: Option<MessageHandler>,
}

impl<B: Backend> UniversalClient<B> {
    pub fn new(backend: B) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                identity: ClientIdentity::generate(),
                state: ConnectionState::Idle,
                topology: None,
                sender_id: None,
                backend,
                on_message: None,
            })),
            driver: None,
        }
    }

    /// Identity token of this client, stamped on outgoing messages as the
    /// correlation tag when echo suppression is on.
    pub async fn token(&self) -> String {
        self.inner.lock().await.identity.token().to_string()
    }

    /// Current lifecycle state name.
    pub async fn state_name(&self) -> &'static str {
        self.inner.lock().await.state.state_name()
    }

    /// Begin the connection lifecycle.
    ///
    /// Valid only in `Idle`; calling it in any other state is a usage error,
    /// never a silent reconnect. Completion is asynchronous: the client
    /// reaches `Ready` once both channels report readiness, observable via
    /// [`UniversalClient::state_name`] and the log stream.
    pub async fn connect<F>(
        &mut self,
        credentials: Credentials,
        topology: Topology,
        on_message: F,
    ) -> Result<()>
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().await;

        if !matches!(inner.state, ConnectionState::Idle) {
            return Err(UsageError::InvalidState {
                operation: "connect",
                state: inner.state.state_name(),
            }
            .into());
        }

        let events = inner
            .backend
            .take_events()
            .ok_or(ChannelError::EventStreamUnavailable)?;

        info!(
            backend = inner.backend.capabilities().name,
            url = %credentials.url,
            "CONNECTING TO: {}", credentials.url
        );

        if let Err(err) = inner.backend.connect(&credentials).await {
            error!("Connection attempt failed: {err}");
            inner.state = ConnectionState::Failed(FailedState {
                reason: err.to_string(),
            });
            return Err(err);
        }

        inner.sender_id = Some(credentials.username);
        inner.topology = Some(topology);
        inner.on_message = Some(Arc::new(on_message));
        inner.apply(LifecycleEvent::ConnectRequested)?;
        drop(inner);

        self.driver = Some(tokio::spawn(drive(Arc::clone(&self.inner), events)));
        Ok(())
    }

    /// Publish one message to the publish topic.
    ///
    /// Valid only in `Ready`: there is no internal buffering, so an earlier
    /// call signals `NotReady` instead of queuing. Returns once the local
    /// encode and publish call are issued, not once the broker acknowledges.
    pub async fn send_message<P: Into<Payload>>(&self, message: P) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if !inner.state.can_send() {
            return Err(UsageError::NotReady {
                state: inner.state.state_name(),
            }
            .into());
        }
        let Some(topology) = inner.topology.clone() else {
            return Err(UsageError::NotReady {
                state: inner.state.state_name(),
            }
            .into());
        };

        let payload = message.into();
        let encoding = inner.backend.capabilities().body_encoding;
        let body = envelope::encode(&payload, encoding);
        let message_id = inner.identity.next_message_id();
        let correlation_tag = topology
            .suppress_echo
            .then(|| inner.identity.token().to_string());
        let sender_id = inner.sender_id.clone().unwrap_or_default();

        let envelope = MessageEnvelope::new(body, message_id, sender_id, correlation_tag);
        debug!(
            message_id = %envelope.message_id,
            exchange = %topology.publish_topic,
            "Publishing message"
        );
        inner.backend.publish(envelope).await
    }

    /// Begin best-effort teardown.
    ///
    /// Every open resource is attempted even when an earlier close in the
    /// cascade fails; each failure is logged independently and reported in
    /// the returned [`CloseReport`], never escalated.
    pub async fn disconnect(&mut self) -> Result<CloseReport> {
        let mut inner = self.inner.lock().await;

        if !matches!(inner.state, ConnectionState::Ready) {
            return Err(UsageError::InvalidState {
                operation: "disconnect",
                state: inner.state.state_name(),
            }
            .into());
        }

        inner.apply(LifecycleEvent::DisconnectRequested)?;
        let report = inner.backend.close().await;
        for outcome in &report.outcomes {
            match &outcome.result {
                Ok(()) => debug!(resource = outcome.resource, "Closed"),
                Err(reason) => {
                    error!(resource = outcome.resource, %reason, "Close failed")
                }
            }
        }
        inner.apply(LifecycleEvent::TeardownComplete)?;
        info!("Disconnected");
        drop(inner);

        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        Ok(report)
    }
}

impl<B: Backend> Drop for UniversalClient<B> {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Driver Task
// ----------------------------------------------------------------------------

/// Consume the backend event stream until it closes or the lifecycle ends.
///
/// Message handlers run after the state lock is released so a callback may
/// call back into the client without deadlocking.
async fn drive<B: Backend>(inner: Arc<Mutex<Inner<B>>>, mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        let (delivery, terminal) = {
            let mut guard = inner.lock().await;
            let delivery = guard.handle_event(event).await;
            (delivery, guard.state.is_terminal())
        };
        if let Some((handler, payload)) = delivery {
            handler(payload);
        }
        if terminal {
            break;
        }
    }
    debug!("Driver task finished");
}

impl<B: Backend> Inner<B> {
    /// Apply one lifecycle event. An invalid transition indicates a driver
    /// bug and moves the machine to `Failed` rather than guessing a state.
    fn apply(&mut self, event: LifecycleEvent) -> std::result::Result<(), StateTransitionError> {
        let current = std::mem::replace(&mut self.state, ConnectionState::Idle);
        let from = current.state_name();
        match current.transition(event) {
            Ok(next) => {
                debug!(from, to = next.state_name(), "Lifecycle transition");
                self.state = next;
                Ok(())
            }
            Err(err) => {
                error!("{err}");
                self.state = ConnectionState::Failed(FailedState {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn handle_event(&mut self, event: BackendEvent) -> Option<(MessageHandler, Payload)> {
        match event {
            BackendEvent::TransportOpen => {
                self.on_transport_open().await;
                None
            }
            BackendEvent::PublishReady => {
                info!("Publish channel ready");
                self.mark_ready(LifecycleEvent::PublishReady);
                None
            }
            BackendEvent::ConsumeReady => {
                info!("Consume channel ready");
                self.mark_ready(LifecycleEvent::ConsumeReady);
                None
            }
            BackendEvent::TransportError { reason } => {
                self.broker_failure(format!("Connection error! {reason}"));
                None
            }
            BackendEvent::TransportClosed => {
                if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
                    info!("Connection closed.");
                } else {
                    self.broker_failure("Connection closed by broker".to_string());
                }
                None
            }
            BackendEvent::ChannelError { channel, reason } => {
                error!("CHANNEL ERROR: {channel} - {reason}");
                if !self.past_setup() {
                    // A channel failure during setup prevents reaching Ready.
                    let _ = self.apply(LifecycleEvent::BrokerFailure { reason });
                }
                None
            }
            BackendEvent::ChannelClosed { channel } => {
                info!("CHANNEL CLOSED: {channel}");
                if !self.past_setup() {
                    let _ = self.apply(LifecycleEvent::BrokerFailure {
                        reason: format!("{channel} channel closed during setup"),
                    });
                }
                None
            }
            BackendEvent::Flow { active } => {
                info!("FLOW: {}", if active { "ON" } else { "OFF" });
                None
            }
            BackendEvent::Delivery {
                body,
                correlation_tag,
            } => self.deliver(body, correlation_tag),
        }
    }

    async fn on_transport_open(&mut self) {
        if !matches!(self.state, ConnectionState::Connecting) {
            warn!(
                state = self.state.state_name(),
                "Transport open event outside Connecting"
            );
            return;
        }
        info!("CONNECTED");
        if self.apply(LifecycleEvent::TransportOpen).is_err() {
            return;
        }
        let Some(topology) = self.topology.clone() else {
            return;
        };

        info!(exchange = %topology.publish_topic, "Opening publish channel");
        if let Err(err) = self.backend.open_publish(&topology).await {
            error!("Publish channel setup failed: {err}");
            let _ = self.apply(LifecycleEvent::BrokerFailure {
                reason: err.to_string(),
            });
            return;
        }

        info!(topic = %topology.subscribe_topic, "Opening subscribe channel");
        if let Err(err) = self.backend.open_subscribe(&topology, &self.identity).await {
            error!("Subscribe channel setup failed: {err}");
            let _ = self.apply(LifecycleEvent::BrokerFailure {
                reason: err.to_string(),
            });
            return;
        }

        let _ = self.apply(LifecycleEvent::ChannelOpensIssued);
    }

    fn mark_ready(&mut self, event: LifecycleEvent) {
        if !matches!(self.state, ConnectionState::ChannelsOpening(_)) {
            warn!(
                state = self.state.state_name(),
                "Readiness signal outside channel setup"
            );
            return;
        }
        if self.apply(event).is_ok() && matches!(self.state, ConnectionState::Ready) {
            info!("Client ready");
        }
    }

    /// Whether the connection has already reached Ready or begun teardown;
    /// broker events in these states are reported but never escalated.
    fn past_setup(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Ready
                | ConnectionState::Closing
                | ConnectionState::Closed
                | ConnectionState::Failed(_)
        )
    }

    fn broker_failure(&mut self, reason: String) {
        error!("{reason}");
        if matches!(
            self.state,
            ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Failed(_)
        ) {
            return;
        }
        let _ = self.apply(LifecycleEvent::BrokerFailure { reason });
    }

    fn deliver(
        &mut self,
        body: WireBody,
        correlation_tag: Option<String>,
    ) -> Option<(MessageHandler, Payload)> {
        let topology = self.topology.as_ref()?;
        let handler = self.on_message.clone()?;

        let payload = envelope::decode(&body);
        let broker_filtered = self.backend.capabilities().broker_side_echo_filter;
        if !filter::should_deliver(
            correlation_tag.as_deref(),
            &self.identity,
            topology,
            broker_filtered,
        ) {
            debug!("Suppressed delivery of own message");
            return None;
        }
        Some((handler, payload))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
