//! Connection lifecycle state machine
//!
//! Owns the client lifecycle from connect through teardown. Transitions
//! consume the current state so an invalid step is a typed error rather than
//! silent corruption. Channel readiness is tracked as two independent flags
//! inside `ChannelsOpening`: the publish and subscribe channels open
//! asynchronously with no ordering guarantee between them, and `Ready` is
//! reached only once both signals have fired.

// ----------------------------------------------------------------------------
// Connection State Types
// ----------------------------------------------------------------------------

/// Lifecycle state of one client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; the only state `connect` is valid in.
    Idle,
    /// Transport connect issued, authentication pending.
    Connecting,
    /// Transport open; channel opens not yet issued.
    Connected,
    /// Publish and subscribe channels opening, readiness pending.
    ChannelsOpening(ChannelsOpeningState),
    /// Both channels ready; sends are valid.
    Ready,
    /// Teardown in progress.
    Closing,
    /// Teardown finished. Terminal.
    Closed,
    /// Broker or transport failure. Terminal; recovery is a fresh client.
    Failed(FailedState),
}

/// Independent readiness signals gathered while channels open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelsOpeningState {
    pub publish_ready: bool,
    pub consume_ready: bool,
}

impl ChannelsOpeningState {
    fn settle(self) -> ConnectionState {
        if self.publish_ready && self.consume_ready {
            ConnectionState::Ready
        } else {
            ConnectionState::ChannelsOpening(self)
        }
    }
}

/// Failure details carried by the terminal `Failed` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedState {
    pub reason: String,
}

// ----------------------------------------------------------------------------
// State Transition Events
// ----------------------------------------------------------------------------

/// Events that drive lifecycle transitions.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// `connect` accepted; transport connect issued.
    ConnectRequested,
    /// Broker authenticated and the transport opened.
    TransportOpen,
    /// Both channel-open calls have been issued.
    ChannelOpensIssued,
    /// The publish side acknowledged its topology declaration.
    PublishReady,
    /// The subscribe side began consuming.
    ConsumeReady,
    /// Broker-level error or close before teardown.
    BrokerFailure { reason: String },
    /// `disconnect` accepted; teardown begins.
    DisconnectRequested,
    /// Best-effort teardown cascade finished.
    TeardownComplete,
}

impl LifecycleEvent {
    fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::ConnectRequested => "ConnectRequested",
            LifecycleEvent::TransportOpen => "TransportOpen",
            LifecycleEvent::ChannelOpensIssued => "ChannelOpensIssued",
            LifecycleEvent::PublishReady => "PublishReady",
            LifecycleEvent::ConsumeReady => "ConsumeReady",
            LifecycleEvent::BrokerFailure { .. } => "BrokerFailure",
            LifecycleEvent::DisconnectRequested => "DisconnectRequested",
            LifecycleEvent::TeardownComplete => "TeardownComplete",
        }
    }
}

/// An event arrived in a state that does not accept it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid transition from {from_state} on {event}")]
pub struct StateTransitionError {
    pub from_state: &'static str,
    pub event: &'static str,
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl ConnectionState {
    /// State name for logging and usage errors.
    pub fn state_name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::ChannelsOpening(_) => "ChannelsOpening",
            ConnectionState::Ready => "Ready",
            ConnectionState::Closing => "Closing",
            ConnectionState::Closed => "Closed",
            ConnectionState::Failed(_) => "Failed",
        }
    }

    /// Whether `send_message` is valid in this state.
    pub fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed(_))
    }

    /// Process an event and transition to the next state (consumes self).
    pub fn transition(self, event: LifecycleEvent) -> Result<ConnectionState, StateTransitionError> {
        let from_state = self.state_name();
        let event_name = event.name();

        let next = match (self, event) {
            (ConnectionState::Idle, LifecycleEvent::ConnectRequested) => ConnectionState::Connecting,

            (ConnectionState::Connecting, LifecycleEvent::TransportOpen) => {
                ConnectionState::Connected
            }

            (ConnectionState::Connected, LifecycleEvent::ChannelOpensIssued) => {
                ConnectionState::ChannelsOpening(ChannelsOpeningState::default())
            }

            (ConnectionState::ChannelsOpening(mut pending), LifecycleEvent::PublishReady) => {
                pending.publish_ready = true;
                pending.settle()
            }

            (ConnectionState::ChannelsOpening(mut pending), LifecycleEvent::ConsumeReady) => {
                pending.consume_ready = true;
                pending.settle()
            }

            // A broker failure anywhere between connect and teardown is
            // terminal. After Ready this covers connection loss; before
            // Ready it covers anything that prevents reaching Ready.
            (
                ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::ChannelsOpening(_)
                | ConnectionState::Ready,
                LifecycleEvent::BrokerFailure { reason },
            ) => ConnectionState::Failed(FailedState { reason }),

            (ConnectionState::Ready, LifecycleEvent::DisconnectRequested) => {
                ConnectionState::Closing
            }

            (ConnectionState::Closing, LifecycleEvent::TeardownComplete) => ConnectionState::Closed,

            (_state, _event) => {
                return Err(StateTransitionError {
                    from_state,
                    event: event_name,
                });
            }
        };

        Ok(next)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
