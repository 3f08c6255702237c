//! End-to-end state machine scenarios over an in-process relay.
//!
//! Two engines (or one engine and a hand-driven peer) exchange envelopes
//! through `LocalRelay`; peer connections are scripted mocks that record
//! every call, so ICE ordering and teardown behavior are observable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use peerline_call_core::{
    detached_track, CallConfig, CallEngine, CallEngineHandle, CallError, CallEvent,
    CallSessionInfo, CallState, CandidateInit, EndReason, LinkState, LocalMedia, MediaConstraints,
    MediaKind, MediaSource, PeerEvent, PeerEventSink, PeerLink, PeerLinkFactory, Result,
    SignalKind, SignalingEnvelope, TrackKind,
};
use peerline_signal_relay::{LocalRelay, SignalingTransport};

// ===== mock media =====

#[derive(Default)]
struct MockMedia {
    acquired: Mutex<Vec<LocalMedia>>,
    fail_with: Mutex<Option<CallError>>,
}

impl MockMedia {
    fn acquired(&self) -> Vec<LocalMedia> {
        self.acquired.lock().clone()
    }

    fn fail_next(&self, error: CallError) {
        *self.fail_with.lock() = Some(error);
    }
}

#[async_trait]
impl MediaSource for MockMedia {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia> {
        if let Some(e) = self.fail_with.lock().take() {
            return Err(e);
        }
        let mut tracks = vec![detached_track(TrackKind::Audio)];
        if constraints.has_video() {
            tracks.push(detached_track(TrackKind::Video));
        }
        let media = LocalMedia::new(tracks);
        self.acquired.lock().push(media.clone());
        Ok(media)
    }
}

// ===== mock peer link =====

struct MockLinkShared {
    log: Mutex<Vec<String>>,
    sink: PeerEventSink,
    closes: AtomicUsize,
    auto_connect: bool,
}

struct MockLink(Arc<MockLinkShared>);

#[async_trait]
impl PeerLink for MockLink {
    async fn create_offer(&self) -> Result<String> {
        self.0.log.lock().push("create_offer".into());
        Ok("offer-sdp".into())
    }

    async fn create_answer(&self) -> Result<String> {
        self.0.log.lock().push("create_answer".into());
        if self.0.auto_connect {
            self.0.sink.send(PeerEvent::StateChanged(LinkState::Connected)).await;
        }
        Ok("answer-sdp".into())
    }

    async fn set_remote_offer(&self, _sdp: &str) -> Result<()> {
        self.0.log.lock().push("set_remote_offer".into());
        Ok(())
    }

    async fn set_remote_answer(&self, _sdp: &str) -> Result<()> {
        self.0.log.lock().push("set_remote_answer".into());
        if self.0.auto_connect {
            self.0.sink.send(PeerEvent::StateChanged(LinkState::Connected)).await;
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<()> {
        self.0
            .log
            .lock()
            .push(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn close(&self) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
        self.0.log.lock().push("close".into());
    }
}

struct MockLinkFactory {
    auto_connect: bool,
    links: Mutex<Vec<Arc<MockLinkShared>>>,
}

impl MockLinkFactory {
    fn new(auto_connect: bool) -> Self {
        Self {
            auto_connect,
            links: Mutex::new(Vec::new()),
        }
    }

    fn link(&self, index: usize) -> Arc<MockLinkShared> {
        self.links.lock()[index].clone()
    }

    fn link_count(&self) -> usize {
        self.links.lock().len()
    }
}

#[async_trait]
impl PeerLinkFactory for MockLinkFactory {
    async fn create(
        &self,
        _config: &CallConfig,
        _media: &LocalMedia,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerLink>> {
        let shared = Arc::new(MockLinkShared {
            log: Mutex::new(Vec::new()),
            sink: events,
            closes: AtomicUsize::new(0),
            auto_connect: self.auto_connect,
        });
        self.links.lock().push(shared.clone());
        Ok(Box::new(MockLink(shared)))
    }
}

// ===== harness =====

struct TestPeer {
    handle: CallEngineHandle,
    links: Arc<MockLinkFactory>,
    media: Arc<MockMedia>,
}

async fn spawn_peer(identity: &str, relay: &Arc<LocalRelay>, auto_connect: bool) -> TestPeer {
    spawn_peer_with_config(identity, relay, auto_connect, CallConfig::default()).await
}

async fn spawn_peer_with_config(
    identity: &str,
    relay: &Arc<LocalRelay>,
    auto_connect: bool,
    config: CallConfig,
) -> TestPeer {
    let links = Arc::new(MockLinkFactory::new(auto_connect));
    let media = Arc::new(MockMedia::default());
    let handle = CallEngine::spawn(
        identity,
        config,
        Arc::clone(relay) as Arc<dyn SignalingTransport>,
        Arc::clone(&media) as Arc<dyn MediaSource>,
        Arc::clone(&links) as Arc<dyn PeerLinkFactory>,
    )
    .await
    .expect("engine spawn");
    TestPeer {
        handle,
        links,
        media,
    }
}

async fn next_event(rx: &mut broadcast::Receiver<CallEvent>) -> CallEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn wait_for_state(
    rx: &mut broadcast::Receiver<CallEvent>,
    state: CallState,
) -> CallSessionInfo {
    loop {
        if let CallEvent::StateChanged { session, .. } = next_event(rx).await {
            if session.state == state {
                return session;
            }
        }
    }
}

async fn wait_for_ended(rx: &mut broadcast::Receiver<CallEvent>) -> (CallSessionInfo, EndReason) {
    loop {
        if let CallEvent::CallEnded {
            session, reason, ..
        } = next_event(rx).await
        {
            return (session, reason);
        }
    }
}

fn candidate(label: &str) -> CandidateInit {
    CandidateInit {
        candidate: format!("candidate:{label} 1 UDP 2122260223 10.0.0.1 50000 typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

/// Let in-flight relay deliveries reach the engine queue
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

// ===== scenarios =====

/// Scenario A: voice call connects end to end.
#[tokio::test]
async fn voice_call_connects_on_both_sides() {
    let relay = Arc::new(LocalRelay::new());
    let alice = spawn_peer("alice", &relay, true).await;
    let bob = spawn_peer("bob", &relay, true).await;
    let mut alice_events = alice.handle.subscribe();
    let mut bob_events = bob.handle.subscribe();

    let info = alice
        .handle
        .start_call("bob", MediaKind::Voice)
        .await
        .expect("start call");
    assert_eq!(info.state, CallState::Calling);
    assert_eq!(info.remote, "bob");

    let ringing = wait_for_state(&mut bob_events, CallState::Ringing).await;
    assert_eq!(ringing.remote, "alice");
    // No media prompt before the user consents.
    assert!(bob.media.acquired().is_empty());

    bob.handle.accept().await.expect("accept");

    let bob_connected = wait_for_state(&mut bob_events, CallState::Connected).await;
    let alice_connected = wait_for_state(&mut alice_events, CallState::Connected).await;
    assert!(bob_connected.connected_at.is_some());
    assert!(alice_connected.connected_at.is_some());
    assert_eq!(alice.handle.current_session().unwrap().state, CallState::Connected);
    assert_eq!(bob.handle.current_session().unwrap().state, CallState::Connected);
}

/// Scenario B: rejection tears the caller down; no peer connection or media
/// is ever created on the callee.
#[tokio::test]
async fn reject_ends_caller_without_callee_resources() {
    let relay = Arc::new(LocalRelay::new());
    let alice = spawn_peer("alice", &relay, true).await;
    let bob = spawn_peer("bob", &relay, true).await;
    let mut alice_events = alice.handle.subscribe();
    let mut bob_events = bob.handle.subscribe();

    alice
        .handle
        .start_call("bob", MediaKind::Voice)
        .await
        .expect("start call");
    wait_for_state(&mut bob_events, CallState::Ringing).await;

    bob.handle.reject().await.expect("reject");

    let (_, reason) = wait_for_ended(&mut alice_events).await;
    assert_eq!(reason, EndReason::Rejected);
    assert!(alice.handle.current_session().is_none());
    assert!(bob.handle.current_session().is_none());

    // Y's side never touched media or webrtc.
    assert!(bob.media.acquired().is_empty());
    assert_eq!(bob.links.link_count(), 0);
    // X's media was acquired and released.
    assert!(alice.media.acquired()[0].is_stopped());
    assert_eq!(alice.links.link(0).closes.load(Ordering::SeqCst), 1);
}

/// Scenario C: candidates that arrive while ringing are buffered and
/// applied in arrival order right after the remote description.
#[tokio::test]
async fn candidates_before_accept_drain_in_order() {
    let relay = Arc::new(LocalRelay::new());
    let bob = spawn_peer("bob", &relay, true).await;
    let mut caller_rx = relay.subscribe("alice").await.unwrap();
    let mut bob_events = bob.handle.subscribe();

    relay
        .send(SignalingEnvelope::offer("bob", "alice", "offer-sdp", MediaKind::Voice))
        .await
        .unwrap();
    wait_for_state(&mut bob_events, CallState::Ringing).await;

    relay
        .send(SignalingEnvelope::ice_candidate("bob", "alice", candidate("c1")))
        .await
        .unwrap();
    relay
        .send(SignalingEnvelope::ice_candidate("bob", "alice", candidate("c2")))
        .await
        .unwrap();
    settle().await;

    bob.handle.accept().await.expect("accept");

    let log = bob.links.link(0).log.lock().clone();
    assert_eq!(
        log,
        vec![
            "set_remote_offer".to_string(),
            format!("candidate:{}", candidate("c1").candidate),
            format!("candidate:{}", candidate("c2").candidate),
            "create_answer".to_string(),
        ]
    );

    // The answer went back to the caller.
    let answer = tokio::time::timeout(Duration::from_secs(2), caller_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(answer.kind, SignalKind::Answer);
}

/// Ordering invariant on the caller: candidates that beat the answer are
/// applied only after the remote description is set, in original order.
#[tokio::test]
async fn caller_buffers_candidates_until_answer() {
    let relay = Arc::new(LocalRelay::new());
    let alice = spawn_peer("alice", &relay, false).await;
    let mut bob_rx = relay.subscribe("bob").await.unwrap();

    alice
        .handle
        .start_call("bob", MediaKind::Voice)
        .await
        .expect("start call");
    let offer = bob_rx.recv().await.unwrap();
    assert_eq!(offer.kind, SignalKind::Offer);

    for label in ["c1", "c2", "c3"] {
        relay
            .send(SignalingEnvelope::ice_candidate("alice", "bob", candidate(label)))
            .await
            .unwrap();
    }
    settle().await;
    // Nothing applied yet: still Calling, no remote description.
    assert_eq!(alice.handle.current_session().unwrap().state, CallState::Calling);

    relay
        .send(SignalingEnvelope::answer("alice", "bob", "answer-sdp"))
        .await
        .unwrap();
    settle().await;

    assert_eq!(alice.handle.current_session().unwrap().state, CallState::Connecting);
    let log = alice.links.link(0).log.lock().clone();
    assert_eq!(
        log,
        vec![
            "create_offer".to_string(),
            "set_remote_answer".to_string(),
            format!("candidate:{}", candidate("c1").candidate),
            format!("candidate:{}", candidate("c2").candidate),
            format!("candidate:{}", candidate("c3").candidate),
        ]
    );
}

/// Candidates arriving after the drain are applied immediately.
#[tokio::test]
async fn late_candidates_apply_without_buffering() {
    let relay = Arc::new(LocalRelay::new());
    let alice = spawn_peer("alice", &relay, false).await;
    let _bob_rx = relay.subscribe("bob").await.unwrap();

    alice.handle.start_call("bob", MediaKind::Voice).await.unwrap();
    relay
        .send(SignalingEnvelope::answer("alice", "bob", "answer-sdp"))
        .await
        .unwrap();
    settle().await;

    relay
        .send(SignalingEnvelope::ice_candidate("alice", "bob", candidate("late")))
        .await
        .unwrap();
    settle().await;

    let log = alice.links.link(0).log.lock().clone();
    assert_eq!(
        log.last().unwrap(),
        &format!("candidate:{}", candidate("late").candidate)
    );
}

/// Scenario D: a failed peer connection tears down locally and notifies the
/// remote side, which ends independently.
#[tokio::test]
async fn connection_failure_propagates_to_both_sides() {
    let relay = Arc::new(LocalRelay::new());
    let alice = spawn_peer("alice", &relay, true).await;
    let bob = spawn_peer("bob", &relay, true).await;
    let mut alice_events = alice.handle.subscribe();
    let mut bob_events = bob.handle.subscribe();

    alice.handle.start_call("bob", MediaKind::Voice).await.unwrap();
    wait_for_state(&mut bob_events, CallState::Ringing).await;
    bob.handle.accept().await.unwrap();
    wait_for_state(&mut alice_events, CallState::Connected).await;
    wait_for_state(&mut bob_events, CallState::Connected).await;

    // X's network drops.
    alice
        .links
        .link(0)
        .sink
        .send(PeerEvent::StateChanged(LinkState::Failed))
        .await;

    let (alice_session, alice_reason) = wait_for_ended(&mut alice_events).await;
    assert_eq!(alice_reason, EndReason::Failed);
    assert_eq!(alice_session.state, CallState::Failed);
    assert!(alice.media.acquired()[0].is_stopped());

    let (_, bob_reason) = wait_for_ended(&mut bob_events).await;
    assert_eq!(bob_reason, EndReason::RemoteHangup);
    assert!(bob.handle.current_session().is_none());
    assert!(alice.handle.current_session().is_none());
}

/// Idempotent teardown: hangup racing a remote `end` stops tracks once and
/// never errors.
#[tokio::test]
async fn double_teardown_is_idempotent() {
    let relay = Arc::new(LocalRelay::new());
    let alice = spawn_peer("alice", &relay, true).await;
    let bob = spawn_peer("bob", &relay, true).await;
    let mut bob_events = bob.handle.subscribe();

    alice.handle.start_call("bob", MediaKind::Voice).await.unwrap();
    wait_for_state(&mut bob_events, CallState::Ringing).await;
    bob.handle.accept().await.unwrap();
    wait_for_state(&mut bob_events, CallState::Connected).await;

    // Remote end and a local click land together.
    bob.handle.hangup().await.expect("first hangup");
    alice.handle.hangup().await.expect("alice hangup");
    bob.handle.hangup().await.expect("second hangup");

    let media = bob.media.acquired();
    assert_eq!(media.len(), 1);
    assert!(media[0].is_stopped());
    assert_eq!(bob.links.link(0).closes.load(Ordering::SeqCst), 1);
    assert!(bob.handle.current_session().is_none());
}

/// State machine completeness: unexpected events are ignored, never a
/// crash, and leave the device callable.
#[tokio::test]
async fn unexpected_events_are_noops() {
    let relay = Arc::new(LocalRelay::new());
    let alice = spawn_peer("alice", &relay, true).await;

    relay
        .send(SignalingEnvelope::answer("alice", "bob", "answer-sdp"))
        .await
        .unwrap();
    relay.send(SignalingEnvelope::end("alice", "bob")).await.unwrap();
    relay
        .send(SignalingEnvelope::ice_candidate("alice", "bob", candidate("x")))
        .await
        .unwrap();
    relay
        .send(SignalingEnvelope::reject("alice", "bob", None))
        .await
        .unwrap();
    settle().await;

    assert!(alice.handle.current_session().is_none());
    // Commands that need a session fail cleanly while idle.
    assert!(matches!(
        alice.handle.accept().await,
        Err(CallError::NoActiveCall)
    ));
    assert!(matches!(
        alice.handle.reject().await,
        Err(CallError::NoActiveCall)
    ));
    // Hangup stays a no-op.
    alice.handle.hangup().await.expect("idle hangup");
    // And the device can still place a call.
    let mut bob_rx = relay.subscribe("bob").await.unwrap();
    alice.handle.start_call("bob", MediaKind::Voice).await.unwrap();
    assert_eq!(bob_rx.recv().await.unwrap().kind, SignalKind::Offer);
}

/// Mutual exclusion: a second call in either direction is refused without
/// disturbing the established session.
#[tokio::test]
async fn busy_policy_protects_active_call() {
    let relay = Arc::new(LocalRelay::new());
    let alice = spawn_peer("alice", &relay, true).await;
    let bob = spawn_peer("bob", &relay, true).await;
    let mut alice_events = alice.handle.subscribe();
    let mut bob_events = bob.handle.subscribe();

    alice.handle.start_call("bob", MediaKind::Voice).await.unwrap();
    wait_for_state(&mut bob_events, CallState::Ringing).await;
    bob.handle.accept().await.unwrap();
    wait_for_state(&mut alice_events, CallState::Connected).await;
    wait_for_state(&mut bob_events, CallState::Connected).await;

    // Outgoing while busy.
    let err = alice.handle.start_call("carol", MediaKind::Voice).await;
    assert!(matches!(err, Err(CallError::Busy { .. })));

    // Incoming while busy: carol gets an immediate busy reject.
    let mut carol_rx = relay.subscribe("carol").await.unwrap();
    relay
        .send(SignalingEnvelope::offer("bob", "carol", "offer-sdp", MediaKind::Voice))
        .await
        .unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(2), carol_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.kind, SignalKind::Reject);
    assert_eq!(reply.reason.as_deref(), Some("busy"));

    // The established call is untouched.
    assert_eq!(bob.handle.current_session().unwrap().state, CallState::Connected);
    assert_eq!(bob.handle.current_session().unwrap().remote, "alice");
}

/// A caller whose busy reject comes back sees RemoteBusy, not a decline.
#[tokio::test]
async fn busy_reject_maps_to_remote_busy() {
    let relay = Arc::new(LocalRelay::new());
    let alice = spawn_peer("alice", &relay, true).await;
    let mut alice_events = alice.handle.subscribe();
    let _bob_rx = relay.subscribe("bob").await.unwrap();

    alice.handle.start_call("bob", MediaKind::Voice).await.unwrap();
    relay
        .send(SignalingEnvelope::reject("alice", "bob", Some("busy")))
        .await
        .unwrap();

    let (_, reason) = wait_for_ended(&mut alice_events).await;
    assert_eq!(reason, EndReason::RemoteBusy);
}

/// Setup that never completes is bounded by the configured timeout.
#[tokio::test]
async fn unanswered_call_times_out() {
    let relay = Arc::new(LocalRelay::new());
    let config = CallConfig {
        setup_timeout: Duration::from_millis(150),
        ..Default::default()
    };
    let alice = spawn_peer_with_config("alice", &relay, true, config).await;
    let mut alice_events = alice.handle.subscribe();

    // Nobody is subscribed for this identity; the offer vanishes, exactly
    // like a lost relay message.
    alice.handle.start_call("ghost", MediaKind::Voice).await.unwrap();

    let (session, reason) = wait_for_ended(&mut alice_events).await;
    assert_eq!(reason, EndReason::Timeout);
    assert_eq!(session.state, CallState::Failed);
    assert!(alice.handle.current_session().is_none());
    assert!(alice.media.acquired()[0].is_stopped());
}

/// Media denial on accept returns the callee to idle and releases the
/// caller instead of leaving it to stall.
#[tokio::test]
async fn media_denial_on_accept_notifies_caller() {
    let relay = Arc::new(LocalRelay::new());
    let alice = spawn_peer("alice", &relay, true).await;
    let bob = spawn_peer("bob", &relay, true).await;
    let mut alice_events = alice.handle.subscribe();
    let mut bob_events = bob.handle.subscribe();

    alice.handle.start_call("bob", MediaKind::Video).await.unwrap();
    wait_for_state(&mut bob_events, CallState::Ringing).await;

    bob.media.fail_next(CallError::PermissionDenied);
    let err = bob.handle.accept().await;
    assert!(matches!(err, Err(CallError::PermissionDenied)));
    assert!(bob.handle.current_session().is_none());

    let (_, reason) = wait_for_ended(&mut alice_events).await;
    assert_eq!(reason, EndReason::RemoteHangup);
    assert!(alice.handle.current_session().is_none());
}

/// Mute and camera toggles flip track enablement and are reflected in the
/// published session.
#[tokio::test]
async fn toggles_update_session_and_tracks() {
    let relay = Arc::new(LocalRelay::new());
    let alice = spawn_peer("alice", &relay, true).await;
    let _bob_rx = relay.subscribe("bob").await.unwrap();

    alice.handle.start_call("bob", MediaKind::Video).await.unwrap();

    assert!(alice.handle.toggle_mute().await.unwrap());
    assert!(alice.handle.current_session().unwrap().muted);
    let media = alice.media.acquired()[0].clone();
    assert!(!media.is_enabled(TrackKind::Audio));
    assert!(!alice.handle.toggle_mute().await.unwrap());
    assert!(media.is_enabled(TrackKind::Audio));

    assert!(alice.handle.toggle_camera().await.unwrap());
    assert!(!media.is_enabled(TrackKind::Video));

    // Camera toggle is meaningless on a voice call.
    alice.handle.hangup().await.unwrap();
    alice.handle.start_call("bob", MediaKind::Voice).await.unwrap();
    assert!(matches!(
        alice.handle.toggle_camera().await,
        Err(CallError::InvalidState { .. })
    ));
}

/// Accept only applies while ringing.
#[tokio::test]
async fn accept_on_outgoing_call_is_invalid() {
    let relay = Arc::new(LocalRelay::new());
    let alice = spawn_peer("alice", &relay, true).await;
    let _bob_rx = relay.subscribe("bob").await.unwrap();

    alice.handle.start_call("bob", MediaKind::Voice).await.unwrap();
    assert!(matches!(
        alice.handle.accept().await,
        Err(CallError::InvalidState { .. })
    ));
    // Still calling; the invalid command disturbed nothing.
    assert_eq!(alice.handle.current_session().unwrap().state, CallState::Calling);
}

/// Shutdown tears down an active call and notifies the peer.
#[tokio::test]
async fn shutdown_ends_active_call() {
    let relay = Arc::new(LocalRelay::new());
    let alice = spawn_peer("alice", &relay, true).await;
    let bob = spawn_peer("bob", &relay, true).await;
    let mut bob_events = bob.handle.subscribe();

    alice.handle.start_call("bob", MediaKind::Voice).await.unwrap();
    wait_for_state(&mut bob_events, CallState::Ringing).await;
    bob.handle.accept().await.unwrap();
    wait_for_state(&mut bob_events, CallState::Connected).await;

    alice.handle.shutdown().await.expect("shutdown");
    let (_, reason) = wait_for_ended(&mut bob_events).await;
    assert_eq!(reason, EndReason::RemoteHangup);

    // The engine is gone; further commands fail closed.
    assert!(matches!(
        alice.handle.hangup().await,
        Err(CallError::EngineClosed)
    ));
}
