//! Publish/subscribe topology and connection credentials

use serde::{Deserialize, Serialize};

/// Routing key used for every queue binding and publish.
pub const ROUTING_KEY: &str = "broadcastkey";

// ----------------------------------------------------------------------------
// Topology
// ----------------------------------------------------------------------------

/// The publish and subscribe endpoints of one client.
///
/// Set once at connect time and never mutated afterward. `suppress_echo` is
/// only meaningful when the publish and subscribe topics coincide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub publish_topic: String,
    pub subscribe_topic: String,
    pub routing_key: String,
    pub suppress_echo: bool,
}

impl Topology {
    pub fn new<P, S>(publish_topic: P, subscribe_topic: S, suppress_echo: bool) -> Self
    where
        P: Into<String>,
        S: Into<String>,
    {
        Self {
            publish_topic: publish_topic.into(),
            subscribe_topic: subscribe_topic.into(),
            routing_key: ROUTING_KEY.to_string(),
            suppress_echo,
        }
    }

    /// Whether the client publishes to the topic it subscribes to.
    pub fn is_shared_topic(&self) -> bool {
        self.publish_topic == self.subscribe_topic
    }
}

// ----------------------------------------------------------------------------
// Credentials
// ----------------------------------------------------------------------------

/// Broker credentials, consumed once by the connect call.
///
/// Only `username` outlives the connection attempt: it is stamped into the
/// sender-id field of outgoing message metadata.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new<U, N, P>(url: U, username: N, password: P) -> Self
    where
        U: Into<String>,
        N: Into<String>,
        P: Into<String>,
    {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_key_is_fixed() {
        let topology = Topology::new("news", "news", true);
        assert_eq!(topology.routing_key, "broadcastkey");
        assert!(topology.is_shared_topic());
    }

    #[test]
    fn split_topics_are_not_shared() {
        let topology = Topology::new("commands", "responses", false);
        assert!(!topology.is_shared_topic());
    }
}
