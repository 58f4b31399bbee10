//! Shared message hub
//!
//! One [`BrokerHub`] stands in for a broker: wires register connections and
//! subscriptions against it, and every publish fans out to the matching
//! subscribers synchronously. Echo suppression is evaluated here, broker-side,
//! exactly as the real backends expect: `no-local` compares the publishing
//! connection, selectors compare the `appId` header.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Header key carrying the sender's identity token.
pub const APP_ID_HEADER: &str = "appId";

// ----------------------------------------------------------------------------
// Messages and Selectors
// ----------------------------------------------------------------------------

/// One message in hub transit: opaque body plus string headers.
///
/// Wires flatten their protocol's property set into headers on publish and
/// rebuild it on delivery, so the hub stays format-agnostic.
#[derive(Debug, Clone)]
pub struct HubMessage {
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl HubMessage {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            headers: Vec::new(),
        }
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed message selector.
///
/// Only the inequality form the JMS backend emits is supported:
/// `appId<>'token'`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    excluded_app_id: String,
}

impl Selector {
    pub fn parse(expression: &str) -> Result<Self, String> {
        let rest = expression
            .strip_prefix("appId<>'")
            .ok_or_else(|| format!("unsupported selector: {expression}"))?;
        let token = rest
            .strip_suffix('\'')
            .ok_or_else(|| format!("unterminated selector: {expression}"))?;
        if token.is_empty() || token.contains('\'') {
            return Err(format!("malformed selector token: {expression}"));
        }
        Ok(Self {
            excluded_app_id: token.to_string(),
        })
    }

    /// Whether a message with the given `appId` header passes the selector.
    pub fn accepts(&self, app_id: Option<&str>) -> bool {
        app_id != Some(self.excluded_app_id.as_str())
    }
}

// ----------------------------------------------------------------------------
// Hub
// ----------------------------------------------------------------------------

/// Handle to one connection registered with the hub.
pub type ConnectionId = u64;

struct Subscriber {
    owner: ConnectionId,
    no_local: bool,
    selector: Option<Selector>,
    tx: mpsc::UnboundedSender<HubMessage>,
}

#[derive(Default)]
struct HubState {
    topics: HashMap<String, Vec<Subscriber>>,
    next_connection: ConnectionId,
}

/// In-process broker shared by any number of loopback wires.
///
/// Clones are handles to the same hub.
#[derive(Clone, Default)]
pub struct BrokerHub {
    state: Arc<StdMutex<HubState>>,
}

impl BrokerHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one connection, returning its id for no-local bookkeeping.
    pub fn register_connection(&self) -> ConnectionId {
        let mut state = self.state.lock().unwrap();
        state.next_connection += 1;
        debug!(connection = state.next_connection, "Hub connection registered");
        state.next_connection
    }

    /// Subscribe a connection to a topic. Deliveries matching the filters
    /// arrive on the returned receiver.
    pub fn subscribe(
        &self,
        topic: &str,
        owner: ConnectionId,
        no_local: bool,
        selector: Option<Selector>,
    ) -> mpsc::UnboundedReceiver<HubMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        debug!(topic, owner, no_local, "Hub subscription added");
        state.topics.entry(topic.to_string()).or_default().push(Subscriber {
            owner,
            no_local,
            selector,
            tx,
        });
        rx
    }

    /// Fan a message out to every matching subscriber of the topic.
    ///
    /// Returns the number of deliveries made. Subscribers whose receiver
    /// is gone are pruned here.
    pub fn publish(&self, topic: &str, origin: ConnectionId, message: HubMessage) -> usize {
        let mut state = self.state.lock().unwrap();
        let Some(subscribers) = state.topics.get_mut(topic) else {
            trace!(topic, "Publish to topic without subscribers");
            return 0;
        };

        let app_id = message.header(APP_ID_HEADER).map(str::to_string);
        let mut delivered = 0;
        subscribers.retain(|subscriber| {
            if subscriber.no_local && subscriber.owner == origin {
                return true;
            }
            if let Some(selector) = &subscriber.selector {
                if !selector.accepts(app_id.as_deref()) {
                    return true;
                }
            }
            match subscriber.tx.send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        trace!(topic, delivered, "Hub publish fanned out");
        delivered
    }

    /// Drop every subscription owned by the connection.
    pub fn remove_connection(&self, owner: ConnectionId) {
        let mut state = self.state.lock().unwrap();
        for subscribers in state.topics.values_mut() {
            subscribers.retain(|s| s.owner != owner);
        }
        debug!(owner, "Hub connection removed");
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
