//! Error types for the signaling transport.

use thiserror::Error;

/// Result type for signaling operations
pub type Result<T> = std::result::Result<T, SignalError>;

/// Errors surfaced by a signaling transport
#[derive(Error, Debug, Clone)]
pub enum SignalError {
    /// The relay refused or failed to accept an outbound envelope.
    ///
    /// Callers log this and move on; the relay offers no retry semantics and
    /// the call degrades to a stall rather than an explicit failure.
    #[error("Signal delivery failed: {reason}")]
    Delivery { reason: String },

    /// Subscribing an identity to its inbound channel failed
    #[error("Subscription failed for {identity}: {reason}")]
    Subscribe { identity: String, reason: String },
}

impl SignalError {
    pub fn delivery(reason: impl Into<String>) -> Self {
        SignalError::Delivery {
            reason: reason.into(),
        }
    }
}
