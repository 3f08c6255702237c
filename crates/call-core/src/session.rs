//! Call session data model.
//!
//! A device holds at most one live session at a time. Idle is the absence
//! of a session; everything else is a `CallState`. The engine owns the
//! mutable session and publishes immutable [`CallSessionInfo`] snapshots at
//! the UI boundary.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use peerline_signal_relay::{Identity, MediaKind};

use crate::peer::RemoteTrackInfo;

/// Unique identifier for a call session, generated locally at call start
pub type SessionId = Uuid;

/// State of a call session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Outgoing: offer sent, waiting for answer or reject
    Calling,
    /// Incoming: offer received and stored, waiting for the user
    Ringing,
    /// Answer sent or received, ICE in progress
    Connecting,
    /// Media is flowing
    Connected,
    /// Terminal: ended by hangup (either side) or normal completion
    Ended,
    /// Terminal: declined while ringing
    Rejected,
    /// Terminal: negotiation, connectivity or timeout failure
    Failed,
}

impl CallState {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Rejected | CallState::Failed)
    }

    /// Whether the session is still being set up or is live
    pub fn is_in_progress(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether a setup timeout applies in this state
    pub fn awaits_setup(&self) -> bool {
        matches!(
            self,
            CallState::Calling | CallState::Ringing | CallState::Connecting
        )
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallState::Calling => "calling",
            CallState::Ringing => "ringing",
            CallState::Connecting => "connecting",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
            CallState::Rejected => "rejected",
            CallState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Direction of a call from this device's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Immutable snapshot of the current session, exposed to the UI
#[derive(Debug, Clone, PartialEq)]
pub struct CallSessionInfo {
    pub session_id: SessionId,
    pub local: Identity,
    pub remote: Identity,
    pub direction: CallDirection,
    pub media_kind: MediaKind,
    pub state: CallState,
    /// When the session was created (offer sent or received)
    pub started_at: DateTime<Utc>,
    /// When the peer connection reported connected
    pub connected_at: Option<DateTime<Utc>>,
    /// When the session reached a terminal state
    pub ended_at: Option<DateTime<Utc>>,
    /// Local microphone muted
    pub muted: bool,
    /// Local camera disabled (video calls only)
    pub camera_off: bool,
    /// Remote tracks received so far; cleared on teardown
    pub remote_tracks: Vec<RemoteTrackInfo>,
}

impl CallSessionInfo {
    /// Connected duration of the call, if it ever connected.
    ///
    /// Runs to "now" while the call is live, and to `ended_at` afterwards;
    /// this is the only call-history datum the outer system keeps.
    pub fn duration(&self) -> Option<ChronoDuration> {
        let connected = self.connected_at?;
        let end = self.ended_at.unwrap_or_else(Utc::now);
        Some(end - connected)
    }
}
