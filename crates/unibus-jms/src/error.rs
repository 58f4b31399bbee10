//! Wire-level error type for the JMS adapter

/// A failed JMS wire operation.
#[derive(Debug, thiserror::Error)]
#[error("JMS {operation} failed: {reason}")]
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
