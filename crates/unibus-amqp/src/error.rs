//! Wire-level error type for the AMQP adapter

/// A failed AMQP wire operation.
///
/// Carries the protocol operation that failed so the backend can map it onto
/// the right `unibus-core` error family.
#[derive(Debug, thiserror::Error)]
#[error("AMQP {operation} failed: {reason}")]
pub struct WireError {
    pub operation: &'static str,
    pub reason: String,
}

impl WireError {
    pub fn new<R: Into<String>>(operation: &'static str, reason: R) -> Self {
        Self {
            operation,
            reason: reason.into(),
        }
    }
}
