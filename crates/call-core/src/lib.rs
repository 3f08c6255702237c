//! Peer-to-peer call sessions for peerline.
//!
//! This crate owns the one genuinely stateful part of the calling feature:
//! negotiating a direct media session between two logged-in users over a
//! fire-and-forget signaling relay, and tracking the call's lifecycle on
//! both ends without any shared server-side authority.
//!
//! The center is [`CallEngine`]: a per-device state machine driven by a
//! single serialized queue of UI commands, inbound signaling envelopes,
//! peer connection callbacks and timers. Around it sit the seams it drives:
//!
//! - [`MediaSource`]: local capture acquisition; the session exclusively
//!   owns the resulting [`LocalMedia`] and stops it exactly once.
//! - [`PeerLinkFactory`] / [`PeerLink`]: one native peer connection per
//!   session, STUN-only, never reused.
//! - [`CandidateBuffer`]: holds ICE candidates that outran the remote
//!   description, applied later in arrival order.
//! - [`SignalingTransport`](peerline_signal_relay::SignalingTransport):
//!   the relay adapter, from the companion `peerline-signal-relay` crate.
//!
//! # Starting an engine
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use peerline_call_core::{CallConfig, CallEngine, SampleMediaSource, WebRtcLinkFactory};
//! use peerline_signal_relay::{LocalRelay, MediaKind};
//!
//! # async fn example() -> Result<(), peerline_call_core::CallError> {
//! let relay = Arc::new(LocalRelay::new());
//! let engine = CallEngine::spawn(
//!     "alice@corp.test",
//!     CallConfig::default(),
//!     relay,
//!     Arc::new(SampleMediaSource::new()),
//!     Arc::new(WebRtcLinkFactory::new()),
//! )
//! .await?;
//!
//! let mut events = engine.subscribe();
//! engine.start_call("bob@corp.test", MediaKind::Voice).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod engine;
mod error;
mod events;
mod ice;
mod media;
mod peer;
mod session;

pub use config::{CallConfig, DEFAULT_STUN_SERVERS};
pub use engine::{CallEngine, CallEngineHandle};
pub use error::{CallError, Result};
pub use events::{CallEvent, EndReason};
pub use ice::CandidateBuffer;
pub use media::{
    detached_track, AudioConstraints, LocalMedia, LocalTrack, MediaConstraints, MediaSource,
    SampleMediaSource, TrackKind, VideoConstraints,
};
pub use peer::{
    LinkState, PeerEvent, PeerEventSink, PeerLink, PeerLinkFactory, RemoteTrackInfo, WebRtcLink,
    WebRtcLinkFactory,
};
pub use session::{CallDirection, CallSessionInfo, CallState, SessionId};

// Re-export the wire types callers deal with directly.
pub use peerline_signal_relay::{CandidateInit, Identity, MediaKind, SignalKind, SignalingEnvelope};
