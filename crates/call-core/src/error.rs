//! Error types for call session management.
//!
//! Every component below the state machine reports failure as a typed
//! result; nothing throws past its own operation. The engine maps each
//! variant to a state transition and a short user-visible reason.

use thiserror::Error;

use peerline_signal_relay::SignalError;

use crate::session::CallState;

/// Result type for call operations
pub type Result<T> = std::result::Result<T, CallError>;

/// Errors surfaced by call components and the engine
#[derive(Error, Debug, Clone)]
pub enum CallError {
    /// Media capture permission was denied by the platform
    #[error("Media permission denied")]
    PermissionDenied,

    /// The requested capture device is missing or unusable
    #[error("Media device unavailable: {reason}")]
    DeviceUnavailable { reason: String },

    /// Offer/answer negotiation failed (rejected or malformed SDP)
    #[error("Negotiation failed: {reason}")]
    NegotiationFailed { reason: String },

    /// The peer connection reported failure after setup
    #[error("Peer connectivity failed")]
    ConnectivityFailed,

    /// The relay refused an outbound envelope
    #[error("Signaling failed: {reason}")]
    SignalingFailed { reason: String },

    /// A call is already active on this device
    #[error("Busy: already in a call with {remote}")]
    Busy { remote: String },

    /// The requested operation does not apply to the current state
    #[error("Cannot {operation} while call is {state}")]
    InvalidState {
        operation: &'static str,
        state: CallState,
    },

    /// The operation needs an active call and there is none
    #[error("No active call")]
    NoActiveCall,

    /// The engine task has shut down
    #[error("Call engine closed")]
    EngineClosed,
}

impl CallError {
    pub fn negotiation(reason: impl Into<String>) -> Self {
        CallError::NegotiationFailed {
            reason: reason.into(),
        }
    }

    pub fn device(reason: impl Into<String>) -> Self {
        CallError::DeviceUnavailable {
            reason: reason.into(),
        }
    }

    /// Media acquisition failures abort the in-flight transition and return
    /// the device to idle, rather than tearing down as `Failed`.
    pub fn is_media_error(&self) -> bool {
        matches!(
            self,
            CallError::PermissionDenied | CallError::DeviceUnavailable { .. }
        )
    }

    /// Short human-readable reason shown by the UI when a call ends on an
    /// error path.
    pub fn user_message(&self) -> &'static str {
        match self {
            CallError::PermissionDenied => "Microphone or camera access was denied",
            CallError::DeviceUnavailable { .. } => "Microphone or camera is unavailable",
            CallError::NegotiationFailed { .. } => "Call setup failed",
            CallError::ConnectivityFailed => "Connection to the other party was lost",
            CallError::SignalingFailed { .. } => "Could not reach the signaling service",
            CallError::Busy { .. } => "Already in a call",
            CallError::InvalidState { .. } => "That action is not available right now",
            CallError::NoActiveCall => "There is no active call",
            CallError::EngineClosed => "Calling is not available",
        }
    }
}

impl From<SignalError> for CallError {
    fn from(e: SignalError) -> Self {
        CallError::SignalingFailed {
            reason: e.to_string(),
        }
    }
}
