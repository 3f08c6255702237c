//! Local media acquisition and ownership.
//!
//! The active session exclusively owns its local media: tracks are attached
//! to the peer connection before signaling and stopped exactly once on the
//! first teardown path reached. Capture pipelines (microphone, camera) live
//! in the embedding application; [`SampleMediaSource`] exposes webrtc sample
//! tracks for them to feed, and capture-backed [`MediaSource`]
//! implementations report denial or missing devices through the same error
//! taxonomy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use peerline_signal_relay::MediaKind;

use crate::error::Result;

/// Kind of a single media track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Audio processing constraints requested from the capture pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Bounded video capture constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    pub max_width: u32,
    pub max_height: u32,
    pub max_framerate: u32,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            max_width: 1280,
            max_height: 720,
            max_framerate: 30,
        }
    }
}

/// Capture constraints for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: AudioConstraints,
    /// `None` for voice calls
    pub video: Option<VideoConstraints>,
}

impl MediaConstraints {
    /// Constraints for the given call kind
    pub fn for_kind(kind: MediaKind) -> Self {
        Self {
            audio: AudioConstraints::default(),
            video: kind.has_video().then(VideoConstraints::default),
        }
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }
}

/// One locally-owned track
pub struct LocalTrack {
    pub kind: TrackKind,
    /// The webrtc-rs track attached to the peer connection. Mock media
    /// sources used in tests leave this empty.
    rtc: Option<Arc<TrackLocalStaticSample>>,
    enabled: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

struct MediaInner {
    tracks: Vec<LocalTrack>,
    stopped: AtomicBool,
}

/// The local media stream for one session.
///
/// Cheap to clone; all clones share the same tracks and stop flag. The
/// session holding it is the sole owner in the design sense: no other
/// component mutates it.
#[derive(Clone)]
pub struct LocalMedia {
    inner: Arc<MediaInner>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self {
            inner: Arc::new(MediaInner {
                tracks,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Tracks to attach to the peer connection, in declaration order
    pub fn rtc_tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        self.inner
            .tracks
            .iter()
            .filter_map(|t| t.rtc.clone())
            .map(|t| t as Arc<dyn TrackLocal + Send + Sync>)
            .collect()
    }

    /// The sample writer for a given kind, for the capture pipeline to feed
    pub fn sample_track(&self, kind: TrackKind) -> Option<Arc<TrackLocalStaticSample>> {
        self.inner
            .tracks
            .iter()
            .find(|t| t.kind == kind)
            .and_then(|t| t.rtc.clone())
    }

    /// Enable or disable tracks of one kind (mute / camera toggle).
    ///
    /// Capture pipelines check the flag and stop writing samples while the
    /// track is disabled.
    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) {
        for track in self.inner.tracks.iter().filter(|t| t.kind == kind) {
            track.enabled.store(enabled, Ordering::SeqCst);
        }
    }

    /// Whether any track of the kind is currently enabled
    pub fn is_enabled(&self, kind: TrackKind) -> bool {
        self.inner
            .tracks
            .iter()
            .any(|t| t.kind == kind && t.enabled())
    }

    pub fn has_track(&self, kind: TrackKind) -> bool {
        self.inner.tracks.iter().any(|t| t.kind == kind)
    }

    /// Stop all tracks. Idempotent: returns `true` only for the call that
    /// actually performed the stop.
    pub fn stop(&self) -> bool {
        let first = self
            .inner
            .stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            for track in &self.inner.tracks {
                track.enabled.store(false, Ordering::SeqCst);
            }
            debug!("local media stopped ({} tracks)", self.inner.tracks.len());
        }
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}

/// Source of local media for new sessions.
///
/// Implementations that front real capture devices fail with
/// [`CallError::PermissionDenied`](crate::CallError::PermissionDenied) or
/// [`CallError::DeviceUnavailable`](crate::CallError::DeviceUnavailable);
/// the engine aborts the in-flight transition and returns to idle.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia>;
}

/// Media source producing webrtc sample tracks (Opus audio, VP8 video).
///
/// The embedding application fetches the writers via
/// [`LocalMedia::sample_track`] and feeds encoded samples from its capture
/// pipeline, honoring the enabled flag for mute and camera toggling.
pub struct SampleMediaSource;

impl SampleMediaSource {
    pub fn new() -> Self {
        Self
    }

    fn audio_track(constraints: &AudioConstraints) -> LocalTrack {
        debug!(
            echo_cancellation = constraints.echo_cancellation,
            noise_suppression = constraints.noise_suppression,
            auto_gain_control = constraints.auto_gain_control,
            "creating local audio track"
        );
        let rtc = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                rtcp_feedback: vec![],
            },
            "audio".to_owned(),
            "peerline-audio".to_owned(),
        ));
        LocalTrack {
            kind: TrackKind::Audio,
            rtc: Some(rtc),
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    fn video_track(constraints: &VideoConstraints) -> LocalTrack {
        debug!(
            max_width = constraints.max_width,
            max_height = constraints.max_height,
            "creating local video track"
        );
        let rtc = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            "video".to_owned(),
            "peerline-video".to_owned(),
        ));
        LocalTrack {
            kind: TrackKind::Video,
            rtc: Some(rtc),
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }
}

#[async_trait]
impl MediaSource for SampleMediaSource {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia> {
        let mut tracks = vec![Self::audio_track(&constraints.audio)];
        if let Some(video) = &constraints.video {
            tracks.push(Self::video_track(video));
        }
        Ok(LocalMedia::new(tracks))
    }
}

/// Build a track without a webrtc backing, for mock media sources in tests
pub fn detached_track(kind: TrackKind) -> LocalTrack {
    LocalTrack {
        kind,
        rtc: None,
        enabled: Arc::new(AtomicBool::new(true)),
    }
}
