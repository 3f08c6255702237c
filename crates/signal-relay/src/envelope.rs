//! Wire types for call signaling messages.
//!
//! The envelope shape matches what the relay fans out to a recipient's
//! channel: a flat JSON object with camelCase keys, one `kind` discriminant,
//! and the payload fields the kind needs (`offer`, `answer`, `candidate`,
//! `callType`, `reason`).

use serde::{Deserialize, Serialize};

/// Stable user identifier, e.g. an email address.
///
/// The relay keys its per-user channels by this value.
pub type Identity = String;

/// Discriminant of a signaling message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// SDP offer from the caller
    Offer,
    /// SDP answer from the callee
    Answer,
    /// Trickled ICE candidate, either direction
    #[serde(rename = "ice-candidate")]
    IceCandidate,
    /// Teardown notification from whichever side ends the call
    End,
    /// Explicit decline of a ringing call (or busy signal)
    Reject,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Offer => write!(f, "offer"),
            SignalKind::Answer => write!(f, "answer"),
            SignalKind::IceCandidate => write!(f, "ice-candidate"),
            SignalKind::End => write!(f, "end"),
            SignalKind::Reject => write!(f, "reject"),
        }
    }
}

/// Requested media for a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio only
    Voice,
    /// Audio plus camera video
    Video,
}

impl MediaKind {
    pub fn has_video(&self) -> bool {
        matches!(self, MediaKind::Video)
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Voice => write!(f, "voice"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Serialized ICE candidate, mirroring the ICECandidateInit dictionary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// One signaling message between two peers.
///
/// Transient: envelopes are never persisted, only relayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingEnvelope {
    /// Recipient identity (the relay routes on this)
    pub to: Identity,
    /// Sender identity
    pub from: Identity,
    pub kind: SignalKind,
    /// SDP payload for `offer`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer: Option<String>,
    /// SDP payload for `answer`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Candidate payload for `ice-candidate`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<CandidateInit>,
    /// Requested media, carried on `offer`
    #[serde(rename = "callType", skip_serializing_if = "Option::is_none")]
    pub call_type: Option<MediaKind>,
    /// Optional machine-readable reason, carried on `reject` ("busy")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SignalingEnvelope {
    fn base(to: impl Into<Identity>, from: impl Into<Identity>, kind: SignalKind) -> Self {
        Self {
            to: to.into(),
            from: from.into(),
            kind,
            offer: None,
            answer: None,
            candidate: None,
            call_type: None,
            reason: None,
        }
    }

    /// Build an `offer` envelope carrying the caller's SDP and media kind
    pub fn offer(
        to: impl Into<Identity>,
        from: impl Into<Identity>,
        sdp: impl Into<String>,
        call_type: MediaKind,
    ) -> Self {
        let mut env = Self::base(to, from, SignalKind::Offer);
        env.offer = Some(sdp.into());
        env.call_type = Some(call_type);
        env
    }

    /// Build an `answer` envelope carrying the callee's SDP
    pub fn answer(
        to: impl Into<Identity>,
        from: impl Into<Identity>,
        sdp: impl Into<String>,
    ) -> Self {
        let mut env = Self::base(to, from, SignalKind::Answer);
        env.answer = Some(sdp.into());
        env
    }

    /// Build an `ice-candidate` envelope
    pub fn ice_candidate(
        to: impl Into<Identity>,
        from: impl Into<Identity>,
        candidate: CandidateInit,
    ) -> Self {
        let mut env = Self::base(to, from, SignalKind::IceCandidate);
        env.candidate = Some(candidate);
        env
    }

    /// Build an `end` envelope
    pub fn end(to: impl Into<Identity>, from: impl Into<Identity>) -> Self {
        Self::base(to, from, SignalKind::End)
    }

    /// Build a `reject` envelope, optionally with a reason ("busy")
    pub fn reject(
        to: impl Into<Identity>,
        from: impl Into<Identity>,
        reason: Option<&str>,
    ) -> Self {
        let mut env = Self::base(to, from, SignalKind::Reject);
        env.reason = reason.map(str::to_owned);
        env
    }

    /// Whether this reject carries the busy signal
    pub fn is_busy_reject(&self) -> bool {
        self.kind == SignalKind::Reject && self.reason.as_deref() == Some("busy")
    }
}
