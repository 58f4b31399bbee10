//! Echo suppression filter
//!
//! When a client publishes and subscribes on the same topic it would
//! otherwise receive its own messages back. Suppression happens in exactly
//! one place per backend: broker-side (noLocal consume flag or subscription
//! selector) when the backend supports it, client-side tag comparison here
//! when it does not.

use crate::identity::ClientIdentity;
use crate::topology::Topology;

/// Decide whether an inbound message reaches the application callback.
///
/// `broker_filtered` is the backend's assertion that its receive path has
/// already excluded the client's own messages upstream; in that case no tag
/// comparison happens here, so a peer that legitimately reuses the tag field
/// is never double-suppressed.
pub fn should_deliver(
    correlation_tag: Option<&str>,
    identity: &ClientIdentity,
    topology: &Topology,
    broker_filtered: bool,
) -> bool {
    if !topology.suppress_echo {
        return true;
    }
    if broker_filtered {
        return true;
    }
    correlation_tag != Some(identity.token())
}
