//! Message envelope and payload codec
//!
//! Converts application-level messages (structured JSON values or opaque
//! strings) into a wire body plus metadata header, and reverses the process
//! on receipt. Two wire body representations exist because the two backend
//! families frame payloads differently: the AMQP side carries raw bytes, the
//! JMS side carries text messages. A backend picks exactly one encoding via
//! its capabilities and never mixes them within one message exchange.
//!
//! Decoding is infallible: a non-JSON inbound body is logged at WARN and
//! passed through as a raw string rather than failing.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::{debug, warn};

// ----------------------------------------------------------------------------
// Payload and Wire Body
// ----------------------------------------------------------------------------

/// An application-level message: structured JSON or an opaque string.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

/// The body as handed to (or received from) the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireBody {
    Binary(Vec<u8>),
    Text(String),
}

impl WireBody {
    /// Byte length of the body, independent of representation.
    pub fn len(&self) -> usize {
        match self {
            WireBody::Binary(bytes) => bytes.len(),
            WireBody::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which wire body representation a backend produces and consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Binary,
    Text,
}

// ----------------------------------------------------------------------------
// Message Envelope
// ----------------------------------------------------------------------------

/// Delivery mode of outgoing messages. Only non-persistent delivery is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    NonPersistent,
}

impl DeliveryMode {
    /// Wire value of the mode (AMQP delivery-mode 1).
    pub fn wire_value(&self) -> u8 {
        match self {
            DeliveryMode::NonPersistent => 1,
        }
    }
}

/// One outgoing message: wire body plus the metadata header.
///
/// Constructed fresh per send and consumed immediately by the backend.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    pub body: WireBody,
    pub content_type: &'static str,
    pub content_encoding: &'static str,
    pub delivery_mode: DeliveryMode,
    pub message_id: String,
    pub priority: u8,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: u64,
    pub sender_id: String,
    pub correlation_tag: Option<String>,
}

impl MessageEnvelope {
    pub const CONTENT_TYPE: &'static str = "text/plain";
    pub const CONTENT_ENCODING: &'static str = "UTF-8";
    pub const PRIORITY: u8 = 6;

    pub fn new(
        body: WireBody,
        message_id: String,
        sender_id: String,
        correlation_tag: Option<String>,
    ) -> Self {
        Self {
            body,
            content_type: Self::CONTENT_TYPE,
            content_encoding: Self::CONTENT_ENCODING,
            delivery_mode: DeliveryMode::NonPersistent,
            message_id,
            priority: Self::PRIORITY,
            timestamp: now_millis(),
            sender_id,
            correlation_tag,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

// ----------------------------------------------------------------------------
// Codec
// ----------------------------------------------------------------------------

/// Encode an application payload into a wire body.
///
/// Structured values are serialized to JSON text first; the result is always
/// UTF-8, framed per the requested encoding.
pub fn encode(payload: &Payload, encoding: BodyEncoding) -> WireBody {
    let text = match payload {
        Payload::Json(value) => value.to_string(),
        Payload::Text(text) => text.clone(),
    };
    match encoding {
        BodyEncoding::Binary => WireBody::Binary(text.into_bytes()),
        BodyEncoding::Text => WireBody::Text(text),
    }
}

/// Decode a wire body back into an application payload.
///
/// Logs the raw payload at DEBUG, then attempts a JSON parse. Parse failure
/// is not an error: the raw string is delivered as [`Payload::Text`] with a
/// WARN log event.
pub fn decode(body: &WireBody) -> Payload {
    let text = match body {
        WireBody::Text(text) => text.clone(),
        WireBody::Binary(bytes) => match String::from_utf8(bytes.clone()) {
            Ok(text) => text,
            Err(_) => {
                warn!("Received body is not valid UTF-8");
                String::from_utf8_lossy(bytes).into_owned()
            }
        },
    };

    debug!("Received from the wire {}", text);

    match serde_json::from_str::<Value>(&text) {
        Ok(value) => Payload::Json(value),
        Err(_) => {
            warn!("Received object is not JSON");
            Payload::Text(text)
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn structured_payload_round_trips() {
        let payload = Payload::Json(json!({"type": "ping", "seq": 7}));

        for encoding in [BodyEncoding::Binary, BodyEncoding::Text] {
            let body = encode(&payload, encoding);
            assert_eq!(decode(&body), payload);
        }
    }

    #[test]
    fn non_json_string_passes_through() {
        let payload = Payload::Text("not json at all".to_string());
        let body = encode(&payload, BodyEncoding::Binary);
        assert_eq!(decode(&body), payload);
    }

    #[test]
    fn binary_encoding_produces_utf8_bytes() {
        let body = encode(&Payload::Json(json!(["a", "b"])), BodyEncoding::Binary);
        match body {
            WireBody::Binary(bytes) => assert_eq!(bytes, br#"["a","b"]"#),
            WireBody::Text(_) => panic!("expected binary body"),
        }
    }

    #[test]
    fn invalid_utf8_is_recovered_as_text() {
        let body = WireBody::Binary(vec![0xff, 0xfe, b'h', b'i']);
        match decode(&body) {
            Payload::Text(text) => assert!(text.ends_with("hi")),
            Payload::Json(_) => panic!("expected raw-string fallback"),
        }
    }

    #[test]
    fn envelope_carries_fixed_metadata() {
        let envelope = MessageEnvelope::new(
            WireBody::Text("x".to_string()),
            "41".to_string(),
            "guest".to_string(),
            None,
        );
        assert_eq!(envelope.content_type, "text/plain");
        assert_eq!(envelope.content_encoding, "UTF-8");
        assert_eq!(envelope.priority, 6);
        assert_eq!(envelope.delivery_mode.wire_value(), 1);
        assert!(envelope.timestamp > 0);
    }

    /// Subscriber recording every event's level and message.
    struct LogSink {
        events: std::sync::Arc<std::sync::Mutex<Vec<(tracing::Level, String)>>>,
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

    fn captured_decode(body: &WireBody) -> (Payload, Vec<(tracing::Level, String)>) {
        let events = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = LogSink {
            events: std::sync::Arc::clone(&events),
        };
        let payload = tracing::subscriber::with_default(sink, || decode(body));
        let events = events.lock().unwrap().clone();
        (payload, events)
    }

    #[test]
    fn decode_logs_raw_body_at_debug() {
        let body = WireBody::Text("{\"type\":\"ping\"}".to_string());
        let (_, events) = captured_decode(&body);

        assert!(events.iter().any(|(level, message)| {
            *level == tracing::Level::DEBUG
                && message == "Received from the wire {\"type\":\"ping\"}"
        }));
        assert!(!events
            .iter()
            .any(|(level, _)| *level == tracing::Level::WARN));
    }

    #[test]
    fn non_json_fallback_is_flagged_at_warn() {
        let body = WireBody::Text("not json at all".to_string());
        let (payload, events) = captured_decode(&body);

        assert_eq!(payload, Payload::Text("not json at all".to_string()));
        assert!(events.iter().any(|(level, message)| {
            *level == tracing::Level::WARN && message == "Received object is not JSON"
        }));
    }

    #[test]
    fn invalid_utf8_is_flagged_at_warn() {
        let body = WireBody::Binary(vec![0xff, b'h', b'i']);
        let (_, events) = captured_decode(&body);

        assert!(events.iter().any(|(level, message)| {
            *level == tracing::Level::WARN && message == "Received body is not valid UTF-8"
        }));
    }

    proptest! {
        #[test]
        fn json_objects_round_trip(entries in proptest::collection::hash_map("[a-z]{1,8}", any::<i64>(), 0..8)) {
            let value = serde_json::to_value(&entries).unwrap();
            let payload = Payload::Json(value);
            let body = encode(&payload, BodyEncoding::Binary);
            prop_assert_eq!(decode(&body), payload);
        }

        #[test]
        fn non_json_strings_round_trip(text in "[ -~]{1,64}") {
            prop_assume!(serde_json::from_str::<Value>(&text).is_err());
            let payload = Payload::Text(text);
            let body = encode(&payload, BodyEncoding::Text);
            prop_assert_eq!(decode(&body), payload);
        }
    }
}
