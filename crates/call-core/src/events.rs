//! UI-facing call events.
//!
//! The engine broadcasts one event per observable change; the UI is the
//! sole consumer. Every event carries a full [`CallSessionInfo`] snapshot so
//! consumers never need to reach back into the engine mid-transition.

use chrono::Duration as ChronoDuration;

use crate::error::CallError;
use crate::peer::RemoteTrackInfo;
use crate::session::{CallSessionInfo, CallState};

/// Why a call reached a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Local user hung up
    Hangup,
    /// Remote side sent `end`
    RemoteHangup,
    /// Local user declined while ringing, or the remote declined our offer
    Rejected,
    /// Remote side was already in a call
    RemoteBusy,
    /// Negotiation or connectivity failure
    Failed,
    /// Setup did not complete within the configured bound
    Timeout,
    /// Local media permission denied or device unavailable
    MediaDenied,
}

impl EndReason {
    /// Short human-readable reason for the UI
    pub fn user_message(&self) -> &'static str {
        match self {
            EndReason::Hangup => "Call ended",
            EndReason::RemoteHangup => "The other party ended the call",
            EndReason::Rejected => "Call declined",
            EndReason::RemoteBusy => "The other party is in another call",
            EndReason::Failed => "Call failed",
            EndReason::Timeout => "No answer",
            EndReason::MediaDenied => "Microphone or camera was not available",
        }
    }
}

/// Events emitted over the engine's broadcast channel
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// An offer arrived while idle; the session is now ringing
    IncomingCall { session: CallSessionInfo },

    /// The session moved between states
    StateChanged {
        session: CallSessionInfo,
        /// `None` when leaving idle
        previous: Option<CallState>,
    },

    /// A remote media track started arriving
    RemoteTrack {
        session: CallSessionInfo,
        track: RemoteTrackInfo,
    },

    /// The session reached a terminal state and the device is idle again
    CallEnded {
        session: CallSessionInfo,
        reason: EndReason,
        /// Connected duration, if the call ever connected
        duration: Option<ChronoDuration>,
    },

    /// A non-fatal error worth surfacing (currently signaling delivery
    /// failures observed mid-call)
    Error { error: CallError },
}

impl CallEvent {
    /// The session snapshot this event describes, if any
    pub fn session(&self) -> Option<&CallSessionInfo> {
        match self {
            CallEvent::IncomingCall { session } => Some(session),
            CallEvent::StateChanged { session, .. } => Some(session),
            CallEvent::RemoteTrack { session, .. } => Some(session),
            CallEvent::CallEnded { session, .. } => Some(session),
            CallEvent::Error { .. } => None,
        }
    }
}
