//! Client identity generation
//!
//! Every client instance owns one [`ClientIdentity`]: a version-4 UUID token
//! used as the correlation tag on outgoing messages, a process-unique queue
//! name, and a randomly seeded message-id counter. The identity is created
//! once at construction and passed through the client explicitly rather than
//! captured in callback state.

use rand::Rng;
use uuid::Uuid;

/// Identity of one client instance.
///
/// Immutable for the client's lifetime except the message-id counter, which
/// advances on every send.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    token: String,
    queue_name: String,
    next_message_id: u64,
}

impl ClientIdentity {
    /// Generate a fresh identity from the thread-local RNG.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            token: Uuid::new_v4().to_string(),
            queue_name: format!("client{}", rng.gen_range(0..1_000_000)),
            next_message_id: rng.gen_range(1..100_000),
        }
    }

    /// UUID-v4 token stamped on outgoing messages for echo suppression.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Name of this client's ephemeral subscribe queue.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Return the current message id as its wire (string) form and advance
    /// the counter. The counter may wrap; uniqueness within one session is
    /// what matters.
    pub fn next_message_id(&mut self) -> String {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        id.to_string()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn token_is_v4_shaped() {
        let identity = ClientIdentity::generate();
        let token = identity.token();
        let hex: Vec<char> = token.chars().filter(|c| *c != '-').collect();

        assert_eq!(token.len(), 36);
        assert_eq!(hex.len(), 32);
        assert_eq!(hex[12], '4');
        assert!(matches!(hex[16], '8' | '9' | 'a' | 'b'));
    }

    #[test]
    fn queue_name_has_client_prefix() {
        let identity = ClientIdentity::generate();
        let suffix = identity.queue_name().strip_prefix("client").unwrap();
        let n: u64 = suffix.parse().unwrap();
        assert!(n < 1_000_000);
    }

    #[test]
    fn tokens_are_pairwise_distinct() {
        let tokens: HashSet<String> = (0..512)
            .map(|_| ClientIdentity::generate().token().to_string())
            .collect();
        assert_eq!(tokens.len(), 512);
    }

    #[test]
    fn message_ids_advance_monotonically() {
        let mut identity = ClientIdentity::generate();
        let first: u64 = identity.next_message_id().parse().unwrap();
        let second: u64 = identity.next_message_id().parse().unwrap();
        assert!((1..100_000).contains(&first));
        assert_eq!(second, first + 1);
    }
}
