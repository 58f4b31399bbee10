//! Backend capability interface
//!
//! The two backend families (AMQP-style, JMS-style) share one lifecycle
//! shape and differ only in topology-binding calls. This module defines the
//! seam between them and the shared [`crate::client::UniversalClient`]:
//! a small async trait whose operations are suspension points, with
//! completion observed on a typed event stream rather than in return values.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::envelope::{BodyEncoding, MessageEnvelope, WireBody};
use crate::errors::Result;
use crate::identity::ClientIdentity;
use crate::topology::{Credentials, Topology};

pub type EventSender = mpsc::Sender<BackendEvent>;
pub type EventReceiver = mpsc::Receiver<BackendEvent>;

// ----------------------------------------------------------------------------
// Backend Events
// ----------------------------------------------------------------------------

/// Which of the two broker channels an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Publish,
    Subscribe,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Publish => write!(f, "publish"),
            ChannelKind::Subscribe => write!(f, "subscribe"),
        }
    }
}

/// Events a backend emits toward the client driver task.
///
/// Events for a given channel arrive in broker emission order; no ordering
/// holds between the publish and subscribe event streams.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// Transport connected and authenticated.
    TransportOpen,
    /// Transport-level error. Terminal for the connection.
    TransportError { reason: String },
    /// Transport closed by the broker or as the tail of teardown.
    TransportClosed,
    /// Publish topology declared and acknowledged.
    PublishReady,
    /// Subscribe topology bound and consuming.
    ConsumeReady,
    /// Channel-scoped error; reported, escalated only pre-Ready.
    ChannelError { channel: ChannelKind, reason: String },
    /// Channel-scoped close event.
    ChannelClosed { channel: ChannelKind },
    /// Broker flow control toggled.
    Flow { active: bool },
    /// An inbound message, with the correlation tag the backend found in
    /// its metadata (if any).
    Delivery {
        body: WireBody,
        correlation_tag: Option<String>,
    },
}

// ----------------------------------------------------------------------------
// Backend Capabilities
// ----------------------------------------------------------------------------

/// Static characteristics of a backend adapter.
#[derive(Debug, Clone)]
pub struct BackendCapabilities {
    /// Backend identifier for logging.
    pub name: &'static str,
    /// The backend's receive path already excludes the client's own
    /// messages (noLocal flag or subscription selector), so the client
    /// must not filter by tag a second time.
    pub broker_side_echo_filter: bool,
    /// The single wire body representation this backend uses.
    pub body_encoding: BodyEncoding,
}

// ----------------------------------------------------------------------------
// Teardown Report
// ----------------------------------------------------------------------------

/// Outcome of closing one broker resource during teardown.
#[derive(Debug)]
pub struct CloseOutcome {
    pub resource: &'static str,
    pub result: std::result::Result<(), String>,
}

/// Per-resource outcomes of a best-effort teardown cascade.
///
/// Every resource is attempted; a failure is recorded and never aborts the
/// remaining closes.
#[derive(Debug, Default)]
pub struct CloseReport {
    pub outcomes: Vec<CloseOutcome>,
}

impl CloseReport {
    pub fn record(&mut self, resource: &'static str, result: std::result::Result<(), String>) {
        self.outcomes.push(CloseOutcome { resource, result });
    }

    pub fn failures(&self) -> impl Iterator<Item = &CloseOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn all_closed(&self) -> bool {
        self.failures().next().is_none()
    }
}

// ----------------------------------------------------------------------------
// Backend Trait
// ----------------------------------------------------------------------------

/// Unified interface over the broker-specific adapters.
#[async_trait]
pub trait Backend: Send + 'static {
    fn capabilities(&self) -> BackendCapabilities;

    /// Begin the transport-level connect. Completion is observed as
    /// [`BackendEvent::TransportOpen`] on the event stream, failure as
    /// [`BackendEvent::TransportError`] or an immediate error here.
    async fn connect(&mut self, credentials: &Credentials) -> Result<()>;

    /// Declare the publish topology. Readiness arrives as
    /// [`BackendEvent::PublishReady`].
    async fn open_publish(&mut self, topology: &Topology) -> Result<()>;

    /// Declare and bind the subscribe topology and begin consuming with
    /// auto-acknowledge. Readiness arrives as [`BackendEvent::ConsumeReady`].
    async fn open_subscribe(
        &mut self,
        topology: &Topology,
        identity: &ClientIdentity,
    ) -> Result<()>;

    /// Publish one envelope. Returns once the publish call is issued, not
    /// once the broker acknowledges it.
    async fn publish(&mut self, envelope: MessageEnvelope) -> Result<()>;

    /// Best-effort teardown of every open resource.
    async fn close(&mut self) -> CloseReport;

    /// Hand the backend's event stream to the driver task. Yields `Some`
    /// exactly once.
    fn take_events(&mut self) -> Option<EventReceiver>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_report_tracks_failures_independently() {
        let mut report = CloseReport::default();
        report.record("producer", Ok(()));
        report.record("consumer", Err("socket reset".to_string()));
        report.record("connection", Ok(()));

        assert!(!report.all_closed());
        let failed: Vec<_> = report.failures().map(|o| o.resource).collect();
        assert_eq!(failed, vec!["consumer"]);
        assert_eq!(report.outcomes.len(), 3);
    }
}
