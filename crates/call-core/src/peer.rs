//! Peer connection lifecycle.
//!
//! One [`PeerLink`] exists per session and is never reused. The link owns
//! the native peer connection: local tracks are attached before any
//! signaling, remote tracks and connection-state changes flow back into the
//! engine's serialized queue through a [`PeerEventSink`], and `close`
//! releases every native resource and is safe to call more than once.
//!
//! The [`PeerLink`] / [`PeerLinkFactory`] traits are the seam the state
//! machine drives; [`WebRtcLinkFactory`] is the webrtc-rs implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use peerline_signal_relay::CandidateInit;

use crate::config::CallConfig;
use crate::engine::EngineInput;
use crate::error::{CallError, Result};
use crate::media::{LocalMedia, TrackKind};
use crate::session::SessionId;

/// Connection state as observed from the native peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl LinkState {
    /// States the engine treats as a connectivity failure
    pub fn is_failure(&self) -> bool {
        matches!(self, LinkState::Failed | LinkState::Disconnected)
    }
}

/// A remote track announced by the peer connection.
///
/// This is deliberately a weak description: the session never owns or
/// closes remote media, closing the peer connection releases it.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTrackInfo {
    pub id: String,
    pub kind: TrackKind,
    pub mime_type: String,
}

/// Asynchronous events a link reports back to the engine
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A locally-gathered ICE candidate to trickle to the peer
    Candidate(CandidateInit),
    /// Native connection state changed
    StateChanged(LinkState),
    /// A remote track started arriving
    TrackStarted(RemoteTrackInfo),
}

/// Session-tagged sender feeding peer events into the engine queue.
///
/// Events from a torn-down session are discarded by the engine, so a
/// callback firing after close is harmless.
#[derive(Clone)]
pub struct PeerEventSink {
    session_id: SessionId,
    tx: mpsc::Sender<EngineInput>,
}

impl PeerEventSink {
    pub(crate) fn new(session_id: SessionId, tx: mpsc::Sender<EngineInput>) -> Self {
        Self { session_id, tx }
    }

    /// Report one event. Best-effort: if the engine is gone the event is
    /// dropped.
    pub async fn send(&self, event: PeerEvent) {
        let _ = self
            .tx
            .send(EngineInput::Peer {
                session_id: self.session_id,
                event,
            })
            .await;
    }
}

/// One end of a direct media session
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Create the local offer and install it as the local description
    async fn create_offer(&self) -> Result<String>;

    /// Create the local answer and install it as the local description
    async fn create_answer(&self) -> Result<String>;

    /// Apply the remote peer's offer
    async fn set_remote_offer(&self, sdp: &str) -> Result<()>;

    /// Apply the remote peer's answer
    async fn set_remote_answer(&self, sdp: &str) -> Result<()>;

    /// Apply one remote ICE candidate. Only called after the remote
    /// description is set; earlier candidates are buffered by the engine.
    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<()>;

    /// Release all native resources. Idempotent.
    async fn close(&self);
}

/// Factory constructing one link per session, with local tracks attached
/// before signaling begins
#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    async fn create(
        &self,
        config: &CallConfig,
        media: &LocalMedia,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerLink>>;
}

fn to_wire(init: RTCIceCandidateInit) -> CandidateInit {
    CandidateInit {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn from_wire(init: CandidateInit) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn map_link_state(state: RTCPeerConnectionState) -> Option<LinkState> {
    match state {
        RTCPeerConnectionState::New => Some(LinkState::New),
        RTCPeerConnectionState::Connecting => Some(LinkState::Connecting),
        RTCPeerConnectionState::Connected => Some(LinkState::Connected),
        RTCPeerConnectionState::Disconnected => Some(LinkState::Disconnected),
        RTCPeerConnectionState::Failed => Some(LinkState::Failed),
        RTCPeerConnectionState::Closed => Some(LinkState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

/// webrtc-rs backed factory: default codecs, default interceptors, and the
/// configured STUN servers (no TURN)
pub struct WebRtcLinkFactory;

impl WebRtcLinkFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerLinkFactory for WebRtcLinkFactory {
    async fn create(
        &self,
        config: &CallConfig,
        media: &LocalMedia,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerLink>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| CallError::negotiation(format!("codec registration: {e}")))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| CallError::negotiation(format!("interceptor registration: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config
                .stun_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| CallError::negotiation(format!("peer connection: {e}")))?,
        );

        // Local tracks go on before any description is created so they are
        // represented in the offer/answer.
        for track in media.rtc_tracks() {
            pc.add_track(track)
                .await
                .map_err(|e| CallError::negotiation(format!("add track: {e}")))?;
        }

        let candidate_sink = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = candidate_sink.clone();
            Box::pin(async move {
                // None marks the end of gathering; only real candidates are
                // trickled.
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => sink.send(PeerEvent::Candidate(to_wire(init))).await,
                    Err(e) => warn!("failed to serialize local ICE candidate: {}", e),
                }
            })
        }));

        let state_sink = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let sink = state_sink.clone();
            Box::pin(async move {
                debug!("peer connection state: {}", state);
                if let Some(mapped) = map_link_state(state) {
                    sink.send(PeerEvent::StateChanged(mapped)).await;
                }
            })
        }));

        let track_sink = events;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                let sink = track_sink.clone();
                let info = RemoteTrackInfo {
                    id: track.id(),
                    kind: match track.kind() {
                        RTPCodecType::Video => TrackKind::Video,
                        _ => TrackKind::Audio,
                    },
                    mime_type: track.codec().capability.mime_type.clone(),
                };
                Box::pin(async move {
                    sink.send(PeerEvent::TrackStarted(info)).await;
                })
            },
        ));

        Ok(Box::new(WebRtcLink {
            pc,
            closed: AtomicBool::new(false),
        }))
    }
}

/// webrtc-rs peer connection wrapper
pub struct WebRtcLink {
    pc: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

#[async_trait]
impl PeerLink for WebRtcLink {
    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| CallError::negotiation(format!("create offer: {e}")))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| CallError::negotiation(format!("set local description: {e}")))?;
        Ok(offer.sdp)
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| CallError::negotiation(format!("create answer: {e}")))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| CallError::negotiation(format!("set local description: {e}")))?;
        Ok(answer.sdp)
    }

    async fn set_remote_offer(&self, sdp: &str) -> Result<()> {
        let desc = RTCSessionDescription::offer(sdp.to_owned())
            .map_err(|e| CallError::negotiation(format!("malformed offer: {e}")))?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| CallError::negotiation(format!("set remote offer: {e}")))
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<()> {
        let desc = RTCSessionDescription::answer(sdp.to_owned())
            .map_err(|e| CallError::negotiation(format!("malformed answer: {e}")))?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| CallError::negotiation(format!("set remote answer: {e}")))
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<()> {
        self.pc
            .add_ice_candidate(from_wire(candidate))
            .await
            .map_err(|e| CallError::negotiation(format!("add ICE candidate: {e}")))
    }

    async fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Err(e) = self.pc.close().await {
                warn!("error closing peer connection: {}", e);
            }
        }
    }
}
