//! Error types for the unibus client
//!
//! Per-concern error enums unified into the main [`ClientError`] type.
//! Payload decode failures are deliberately absent: a non-JSON inbound body
//! is recovered locally by raw-string delivery (see [`crate::envelope`]) and
//! is never surfaced to the application as a failure.

use crate::state::StateTransitionError;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Authentication or transport-level failure. Terminal: the client moves to
/// `Failed` and never retries on its own; recovery is a fresh connect.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },
    #[error("Transport failure: {reason}")]
    TransportFailed { reason: String },
    #[error("Connection closed by broker: {reason}")]
    ClosedByBroker { reason: String },
}

/// Exchange, queue, producer, or consumer setup failure. Reported, and fatal
/// to the connection only when it prevents reaching `Ready`.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Publish channel setup failed: {reason}")]
    PublishSetup { reason: String },
    #[error("Subscribe channel setup failed: {reason}")]
    SubscribeSetup { reason: String },
    #[error("Publish failed: {reason}")]
    PublishFailed { reason: String },
    #[error("Backend event stream unavailable")]
    EventStreamUnavailable,
}

/// An API call made outside its valid lifecycle state. Signaled synchronously
/// to the caller; the connection state is left untouched.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("{operation} is not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    #[error("send_message requires the Ready state (current: {state})")]
    NotReady { state: &'static str },
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Core error type for the unibus client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl ClientError {
    /// Create a transport failure error with a reason
    pub fn transport_failed<R: Into<String>>(reason: R) -> Self {
        ClientError::Connection(ConnectionError::TransportFailed {
            reason: reason.into(),
        })
    }

    /// Create an authentication failure error with a reason
    pub fn authentication_failed<R: Into<String>>(reason: R) -> Self {
        ClientError::Connection(ConnectionError::AuthenticationFailed {
            reason: reason.into(),
        })
    }

    /// Create a configuration error with a reason
    pub fn config_error<R: Into<String>>(reason: R) -> Self {
        ClientError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a publish failure error with a reason
    pub fn publish_failed<R: Into<String>>(reason: R) -> Self {
        ClientError::Channel(ChannelError::PublishFailed {
            reason: reason.into(),
        })
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, ClientError>;
