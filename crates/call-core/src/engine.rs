//! The call session state machine.
//!
//! One [`CallEngine`] runs per logged-in device. Every input (UI commands,
//! inbound signaling envelopes, peer connection callbacks, the setup timer)
//! lands on a single queue consumed one item at a time; a transition in
//! flight completes (or explicitly fails) before the next input is applied.
//! That serialization is the correctness mechanism: without it a
//! `receive answer` and a `hangup` could interleave and operate on a peer
//! connection that is simultaneously being closed.
//!
//! Idle is the absence of a session. At most one session exists at a time;
//! a second call request in either direction gets a busy signal.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use peerline_signal_relay::{
    Identity, MediaKind, SignalKind, SignalingEnvelope, SignalingTransport,
};

use crate::config::CallConfig;
use crate::error::{CallError, Result};
use crate::events::{CallEvent, EndReason};
use crate::ice::CandidateBuffer;
use crate::media::{LocalMedia, MediaConstraints, MediaSource, TrackKind};
use crate::peer::{LinkState, PeerEvent, PeerEventSink, PeerLink, PeerLinkFactory};
use crate::session::{CallDirection, CallSessionInfo, CallState, SessionId};

/// Everything the engine consumes, in arrival order
pub(crate) enum EngineInput {
    Command(Command),
    Signal(SignalingEnvelope),
    Peer {
        session_id: SessionId,
        event: PeerEvent,
    },
    SetupTimeout {
        session_id: SessionId,
    },
}

/// UI commands, each with a oneshot reply
pub(crate) enum Command {
    StartCall {
        remote: Identity,
        kind: MediaKind,
        reply: oneshot::Sender<Result<CallSessionInfo>>,
    },
    Accept {
        reply: oneshot::Sender<Result<()>>,
    },
    Reject {
        reply: oneshot::Sender<Result<()>>,
    },
    Hangup {
        reply: oneshot::Sender<Result<()>>,
    },
    ToggleMute {
        reply: oneshot::Sender<Result<bool>>,
    },
    ToggleCamera {
        reply: oneshot::Sender<Result<bool>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// The single live session and everything it owns
struct ActiveSession {
    info: CallSessionInfo,
    /// Inbound offer held while ringing, consumed on accept. Lives in the
    /// session, never in a process-wide slot.
    pending_offer: Option<String>,
    candidates: CandidateBuffer,
    media: Option<LocalMedia>,
    link: Option<Box<dyn PeerLink>>,
    timer: Option<JoinHandle<()>>,
}

enum Flow {
    Continue,
    Stop,
}

/// Cloneable handle to a running engine: the UI boundary.
///
/// `start_call` / `accept` / `reject` / `hangup` / `toggle_mute` /
/// `toggle_camera` are the only externally invokable operations;
/// `current_session` and `subscribe` expose state to the UI.
#[derive(Clone)]
pub struct CallEngineHandle {
    identity: Identity,
    tx: mpsc::Sender<EngineInput>,
    events: broadcast::Sender<CallEvent>,
    current: Arc<RwLock<Option<CallSessionInfo>>>,
}

impl CallEngineHandle {
    async fn command<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineInput::Command(build(reply_tx)))
            .await
            .map_err(|_| CallError::EngineClosed)?;
        reply_rx.await.map_err(|_| CallError::EngineClosed)?
    }

    /// Start an outgoing call
    pub async fn start_call(&self, remote: impl Into<Identity>, kind: MediaKind) -> Result<CallSessionInfo> {
        let remote = remote.into();
        self.command(|reply| Command::StartCall { remote, kind, reply })
            .await
    }

    /// Accept the ringing incoming call
    pub async fn accept(&self) -> Result<()> {
        self.command(|reply| Command::Accept { reply }).await
    }

    /// Decline the ringing incoming call
    pub async fn reject(&self) -> Result<()> {
        self.command(|reply| Command::Reject { reply }).await
    }

    /// End the active call. A no-op when the device is already idle, so a
    /// user click racing a remote `end` never errors.
    pub async fn hangup(&self) -> Result<()> {
        self.command(|reply| Command::Hangup { reply }).await
    }

    /// Toggle the microphone; returns the new muted state
    pub async fn toggle_mute(&self) -> Result<bool> {
        self.command(|reply| Command::ToggleMute { reply }).await
    }

    /// Toggle the camera on a video call; returns whether the camera is
    /// now off
    pub async fn toggle_camera(&self) -> Result<bool> {
        self.command(|reply| Command::ToggleCamera { reply }).await
    }

    /// Tear down any active call and stop the engine task
    pub async fn shutdown(&self) -> Result<()> {
        self.command(|reply| Command::Shutdown { reply }).await
    }

    /// Snapshot of the current session, or `None` when idle
    pub fn current_session(&self) -> Option<CallSessionInfo> {
        self.current.read().clone()
    }

    /// Subscribe to the engine's event stream
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}

/// The engine task state. Constructed and consumed by [`CallEngine::spawn`].
pub struct CallEngine {
    identity: Identity,
    config: CallConfig,
    transport: Arc<dyn SignalingTransport>,
    media: Arc<dyn MediaSource>,
    links: Arc<dyn PeerLinkFactory>,
    events: broadcast::Sender<CallEvent>,
    tx: mpsc::Sender<EngineInput>,
    current: Arc<RwLock<Option<CallSessionInfo>>>,
    session: Option<ActiveSession>,
}

impl CallEngine {
    /// Subscribe to signaling for `identity`, spawn the engine task, and
    /// return the UI handle.
    pub async fn spawn(
        identity: impl Into<Identity>,
        config: CallConfig,
        transport: Arc<dyn SignalingTransport>,
        media: Arc<dyn MediaSource>,
        links: Arc<dyn PeerLinkFactory>,
    ) -> Result<CallEngineHandle> {
        config.validate()?;
        let identity = identity.into();

        let mut inbound = transport.subscribe(&identity).await?;
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (events, _) = broadcast::channel(config.event_capacity);
        let current = Arc::new(RwLock::new(None));

        // Pump inbound signaling into the serialized queue.
        let signal_tx = tx.clone();
        tokio::spawn(async move {
            while let Some(envelope) = inbound.recv().await {
                if signal_tx.send(EngineInput::Signal(envelope)).await.is_err() {
                    break;
                }
            }
        });

        let engine = CallEngine {
            identity: identity.clone(),
            config,
            transport,
            media,
            links,
            events: events.clone(),
            tx: tx.clone(),
            current: Arc::clone(&current),
            session: None,
        };
        tokio::spawn(engine.run(rx));

        info!(identity = %identity, "call engine started");
        Ok(CallEngineHandle {
            identity,
            tx,
            events,
            current,
        })
    }

    async fn run(mut self, mut rx: mpsc::Receiver<EngineInput>) {
        while let Some(input) = rx.recv().await {
            match input {
                EngineInput::Command(cmd) => {
                    if let Flow::Stop = self.handle_command(cmd).await {
                        break;
                    }
                }
                EngineInput::Signal(envelope) => self.handle_signal(envelope).await,
                EngineInput::Peer { session_id, event } => {
                    self.handle_peer(session_id, event).await
                }
                EngineInput::SetupTimeout { session_id } => {
                    self.handle_setup_timeout(session_id).await
                }
            }
        }
        debug!(identity = %self.identity, "call engine stopped");
    }

    // ===== commands =====

    async fn handle_command(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::StartCall { remote, kind, reply } => {
                let result = self.start_call(remote, kind).await;
                let _ = reply.send(result);
            }
            Command::Accept { reply } => {
                let _ = reply.send(self.accept().await);
            }
            Command::Reject { reply } => {
                let _ = reply.send(self.reject().await);
            }
            Command::Hangup { reply } => {
                let _ = reply.send(self.hangup().await);
            }
            Command::ToggleMute { reply } => {
                let _ = reply.send(self.toggle_track(TrackKind::Audio));
            }
            Command::ToggleCamera { reply } => {
                let _ = reply.send(self.toggle_track(TrackKind::Video));
            }
            Command::Shutdown { reply } => {
                if let Some(session) = self.session.take() {
                    self.teardown(session, CallState::Ended, EndReason::Hangup, true)
                        .await;
                }
                let _ = reply.send(Ok(()));
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn start_call(&mut self, remote: Identity, kind: MediaKind) -> Result<CallSessionInfo> {
        if let Some(session) = &self.session {
            return Err(CallError::Busy {
                remote: session.info.remote.clone(),
            });
        }

        let constraints = MediaConstraints::for_kind(kind);
        // A media failure here leaves the device idle: no session exists yet.
        let media = self.media.acquire(&constraints).await?;

        let session_id = Uuid::new_v4();
        let sink = PeerEventSink::new(session_id, self.tx.clone());
        let link = match self.links.create(&self.config, &media, sink).await {
            Ok(link) => link,
            Err(e) => {
                media.stop();
                return Err(e);
            }
        };
        let sdp = match link.create_offer().await {
            Ok(sdp) => sdp,
            Err(e) => {
                media.stop();
                link.close().await;
                return Err(e);
            }
        };

        let info = CallSessionInfo {
            session_id,
            local: self.identity.clone(),
            remote: remote.clone(),
            direction: CallDirection::Outgoing,
            media_kind: kind,
            state: CallState::Calling,
            started_at: Utc::now(),
            connected_at: None,
            ended_at: None,
            muted: false,
            camera_off: false,
            remote_tracks: Vec::new(),
        };
        let timer = self.arm_setup_timer(session_id);
        self.session = Some(ActiveSession {
            info: info.clone(),
            pending_offer: None,
            candidates: CandidateBuffer::new(),
            media: Some(media),
            link: Some(link),
            timer: Some(timer),
        });
        self.publish();
        self.emit(CallEvent::StateChanged {
            session: info.clone(),
            previous: None,
        });

        info!(call_id = %session_id, remote = %remote, kind = %kind, "outgoing call started");
        self.send_signal(SignalingEnvelope::offer(
            remote,
            self.identity.clone(),
            sdp,
            kind,
        ))
        .await;
        Ok(info)
    }

    async fn accept(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Err(CallError::NoActiveCall);
        };
        if session.info.state != CallState::Ringing {
            let state = session.info.state;
            self.session = Some(session);
            return Err(CallError::InvalidState {
                operation: "accept",
                state,
            });
        }

        let constraints = MediaConstraints::for_kind(session.info.media_kind);
        let media = match self.media.acquire(&constraints).await {
            Ok(media) => media,
            Err(e) => {
                // The caller is told the call is over; otherwise it could
                // only stall until its own timeout.
                self.teardown(session, CallState::Failed, EndReason::MediaDenied, true)
                    .await;
                return Err(e);
            }
        };
        session.media = Some(media.clone());

        let sink = PeerEventSink::new(session.info.session_id, self.tx.clone());
        let link = match self.links.create(&self.config, &media, sink).await {
            Ok(link) => link,
            Err(e) => {
                self.teardown(session, CallState::Failed, EndReason::Failed, true)
                    .await;
                return Err(e);
            }
        };

        let Some(offer) = session.pending_offer.take() else {
            link.close().await;
            self.teardown(session, CallState::Failed, EndReason::Failed, true)
                .await;
            return Err(CallError::negotiation("ringing session lost its stored offer"));
        };
        if let Err(e) = link.set_remote_offer(&offer).await {
            link.close().await;
            self.teardown(session, CallState::Failed, EndReason::Failed, true)
                .await;
            return Err(e);
        }

        // Remote description is in place: apply everything that arrived
        // early, in arrival order.
        for candidate in session.candidates.drain() {
            if let Err(e) = link.add_ice_candidate(candidate).await {
                warn!(call_id = %session.info.session_id, "buffered ICE candidate rejected: {}", e);
            }
        }

        let sdp = match link.create_answer().await {
            Ok(sdp) => sdp,
            Err(e) => {
                link.close().await;
                self.teardown(session, CallState::Failed, EndReason::Failed, true)
                    .await;
                return Err(e);
            }
        };

        session.link = Some(link);
        session.info.state = CallState::Connecting;
        let info = session.info.clone();
        self.session = Some(session);
        self.publish();
        self.emit(CallEvent::StateChanged {
            session: info.clone(),
            previous: Some(CallState::Ringing),
        });

        info!(call_id = %info.session_id, remote = %info.remote, "incoming call accepted");
        self.send_signal(SignalingEnvelope::answer(
            info.remote.clone(),
            self.identity.clone(),
            sdp,
        ))
        .await;
        Ok(())
    }

    async fn reject(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Err(CallError::NoActiveCall);
        };
        if session.info.state != CallState::Ringing {
            let state = session.info.state;
            self.session = Some(session);
            return Err(CallError::InvalidState {
                operation: "reject",
                state,
            });
        }

        info!(call_id = %session.info.session_id, remote = %session.info.remote, "incoming call rejected");
        self.send_signal(SignalingEnvelope::reject(
            session.info.remote.clone(),
            self.identity.clone(),
            None,
        ))
        .await;
        // The reject envelope already told the caller; no trailing `end`.
        self.teardown(session, CallState::Rejected, EndReason::Rejected, false)
            .await;
        Ok(())
    }

    async fn hangup(&mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => {
                info!(call_id = %session.info.session_id, "hangup");
                self.teardown(session, CallState::Ended, EndReason::Hangup, true)
                    .await;
                Ok(())
            }
            // Already idle: the second of two racing teardown paths.
            None => Ok(()),
        }
    }

    fn toggle_track(&mut self, kind: TrackKind) -> Result<bool> {
        let Some(session) = self.session.as_mut() else {
            return Err(CallError::NoActiveCall);
        };
        let Some(media) = session.media.as_ref() else {
            return Err(CallError::InvalidState {
                operation: "toggle media",
                state: session.info.state,
            });
        };
        if kind == TrackKind::Video && !session.info.media_kind.has_video() {
            return Err(CallError::InvalidState {
                operation: "toggle camera",
                state: session.info.state,
            });
        }

        let disabled = match kind {
            TrackKind::Audio => {
                session.info.muted = !session.info.muted;
                session.info.muted
            }
            TrackKind::Video => {
                session.info.camera_off = !session.info.camera_off;
                session.info.camera_off
            }
        };
        media.set_enabled(kind, !disabled);
        let info = session.info.clone();
        let state = info.state;
        self.publish();
        self.emit(CallEvent::StateChanged {
            session: info,
            previous: Some(state),
        });
        Ok(disabled)
    }

    // ===== inbound signaling =====

    async fn handle_signal(&mut self, envelope: SignalingEnvelope) {
        if envelope.to != self.identity {
            warn!(to = %envelope.to, "misrouted envelope ignored");
            return;
        }
        debug!(from = %envelope.from, kind = %envelope.kind, "inbound signal");
        match envelope.kind {
            SignalKind::Offer => self.on_offer(envelope).await,
            SignalKind::Answer => self.on_answer(envelope).await,
            SignalKind::IceCandidate => self.on_candidate(envelope).await,
            SignalKind::End => self.on_end(envelope).await,
            SignalKind::Reject => self.on_reject(envelope).await,
        }
    }

    async fn on_offer(&mut self, envelope: SignalingEnvelope) {
        if self.session.is_some() {
            // Busy policy: the active session is not disturbed, the second
            // caller gets an immediate busy signal.
            info!(from = %envelope.from, "busy: rejecting second incoming call");
            self.send_signal(SignalingEnvelope::reject(
                envelope.from,
                self.identity.clone(),
                Some("busy"),
            ))
            .await;
            return;
        }
        let Some(sdp) = envelope.offer else {
            warn!(from = %envelope.from, "offer without SDP ignored");
            return;
        };
        let kind = envelope.call_type.unwrap_or(MediaKind::Voice);

        // Media is deliberately not acquired here: no permission prompt
        // until the user consents by accepting.
        let session_id = Uuid::new_v4();
        let info = CallSessionInfo {
            session_id,
            local: self.identity.clone(),
            remote: envelope.from.clone(),
            direction: CallDirection::Incoming,
            media_kind: kind,
            state: CallState::Ringing,
            started_at: Utc::now(),
            connected_at: None,
            ended_at: None,
            muted: false,
            camera_off: false,
            remote_tracks: Vec::new(),
        };
        let timer = self.arm_setup_timer(session_id);
        self.session = Some(ActiveSession {
            info: info.clone(),
            pending_offer: Some(sdp),
            candidates: CandidateBuffer::new(),
            media: None,
            link: None,
            timer: Some(timer),
        });
        self.publish();
        info!(call_id = %session_id, from = %info.remote, kind = %kind, "incoming call ringing");
        self.emit(CallEvent::IncomingCall {
            session: info.clone(),
        });
        self.emit(CallEvent::StateChanged {
            session: info,
            previous: None,
        });
    }

    async fn on_answer(&mut self, envelope: SignalingEnvelope) {
        let Some(mut session) = self.session.take() else {
            debug!(from = %envelope.from, "answer while idle ignored");
            return;
        };
        if session.info.state != CallState::Calling || session.info.remote != envelope.from {
            debug!(from = %envelope.from, state = %session.info.state, "unexpected answer ignored");
            self.session = Some(session);
            return;
        }
        let Some(sdp) = envelope.answer else {
            warn!(from = %envelope.from, "answer without SDP ignored");
            self.session = Some(session);
            return;
        };
        let Some(link) = session.link.as_ref() else {
            // An outgoing session always carries its link; treat loss as a
            // negotiation failure.
            self.teardown(session, CallState::Failed, EndReason::Failed, true)
                .await;
            return;
        };

        if let Err(e) = link.set_remote_answer(&sdp).await {
            warn!(call_id = %session.info.session_id, "remote answer rejected: {}", e);
            self.teardown(session, CallState::Failed, EndReason::Failed, true)
                .await;
            return;
        }
        for candidate in session.candidates.drain() {
            if let Err(e) = link.add_ice_candidate(candidate).await {
                warn!(call_id = %session.info.session_id, "buffered ICE candidate rejected: {}", e);
            }
        }

        session.info.state = CallState::Connecting;
        let info = session.info.clone();
        self.session = Some(session);
        self.publish();
        debug!(call_id = %info.session_id, "answer applied, connecting");
        self.emit(CallEvent::StateChanged {
            session: info,
            previous: Some(CallState::Calling),
        });
    }

    async fn on_candidate(&mut self, envelope: SignalingEnvelope) {
        let Some(session) = self.session.as_mut() else {
            debug!(from = %envelope.from, "ICE candidate while idle ignored");
            return;
        };
        if session.info.remote != envelope.from {
            warn!(from = %envelope.from, "ICE candidate from unrelated sender ignored");
            return;
        }
        let Some(candidate) = envelope.candidate else {
            warn!(from = %envelope.from, "ice-candidate envelope without payload ignored");
            return;
        };

        match session.candidates.push(candidate) {
            // Remote description not set yet: held in arrival order.
            None => debug!(
                call_id = %session.info.session_id,
                buffered = session.candidates.len(),
                "ICE candidate buffered"
            ),
            Some(candidate) => match session.link.as_ref() {
                Some(link) => {
                    if let Err(e) = link.add_ice_candidate(candidate).await {
                        warn!(call_id = %session.info.session_id, "ICE candidate rejected: {}", e);
                    }
                }
                None => warn!(
                    call_id = %session.info.session_id,
                    "ICE candidate dropped, no peer connection"
                ),
            },
        }
    }

    async fn on_end(&mut self, envelope: SignalingEnvelope) {
        let Some(session) = self.session.take() else {
            debug!(from = %envelope.from, "end while idle ignored");
            return;
        };
        if session.info.remote != envelope.from {
            warn!(from = %envelope.from, "end from unrelated sender ignored");
            self.session = Some(session);
            return;
        }
        info!(call_id = %session.info.session_id, "remote ended the call");
        // The remote originated the teardown, so no `end` goes back.
        self.teardown(session, CallState::Ended, EndReason::RemoteHangup, false)
            .await;
    }

    async fn on_reject(&mut self, envelope: SignalingEnvelope) {
        let Some(session) = self.session.take() else {
            debug!(from = %envelope.from, "reject while idle ignored");
            return;
        };
        let applicable = session.info.direction == CallDirection::Outgoing
            && session.info.remote == envelope.from
            && matches!(
                session.info.state,
                CallState::Calling | CallState::Connecting
            );
        if !applicable {
            debug!(from = %envelope.from, state = %session.info.state, "unexpected reject ignored");
            self.session = Some(session);
            return;
        }
        let reason = if envelope.is_busy_reject() {
            EndReason::RemoteBusy
        } else {
            EndReason::Rejected
        };
        info!(call_id = %session.info.session_id, ?reason, "call rejected by remote");
        self.teardown(session, CallState::Ended, reason, false).await;
    }

    // ===== peer connection events =====

    async fn handle_peer(&mut self, session_id: SessionId, event: PeerEvent) {
        let stale = !matches!(&self.session, Some(s) if s.info.session_id == session_id);
        if stale {
            // Callback from a torn-down session; its result is discarded.
            debug!(call_id = %session_id, "stale peer event discarded");
            return;
        }

        match event {
            PeerEvent::Candidate(candidate) => {
                let Some(session) = self.session.as_ref() else { return };
                let envelope = SignalingEnvelope::ice_candidate(
                    session.info.remote.clone(),
                    session.info.local.clone(),
                    candidate,
                );
                self.send_signal(envelope).await;
            }
            PeerEvent::StateChanged(LinkState::Connected) => {
                let Some(session) = self.session.as_mut() else { return };
                if session.info.state != CallState::Connecting {
                    debug!(call_id = %session_id, state = %session.info.state, "connected signal ignored");
                    return;
                }
                session.info.state = CallState::Connected;
                session.info.connected_at = Some(Utc::now());
                if let Some(timer) = session.timer.take() {
                    timer.abort();
                }
                let info = session.info.clone();
                self.publish();
                info!(call_id = %session_id, remote = %info.remote, "call connected");
                self.emit(CallEvent::StateChanged {
                    session: info,
                    previous: Some(CallState::Connecting),
                });
            }
            PeerEvent::StateChanged(link_state) if link_state.is_failure() => {
                let Some(session) = self.session.take() else { return };
                if session.info.state.is_terminal() {
                    self.session = Some(session);
                    return;
                }
                warn!(call_id = %session_id, ?link_state, "peer connection failed");
                self.teardown(session, CallState::Failed, EndReason::Failed, true)
                    .await;
            }
            PeerEvent::StateChanged(link_state) => {
                debug!(call_id = %session_id, ?link_state, "peer connection state");
            }
            PeerEvent::TrackStarted(track) => {
                let Some(session) = self.session.as_mut() else { return };
                session.info.remote_tracks.push(track.clone());
                let info = session.info.clone();
                self.publish();
                debug!(call_id = %session_id, track = %track.kind, "remote track started");
                self.emit(CallEvent::RemoteTrack {
                    session: info,
                    track,
                });
            }
        }
    }

    async fn handle_setup_timeout(&mut self, session_id: SessionId) {
        let applies = matches!(
            &self.session,
            Some(s) if s.info.session_id == session_id && s.info.state.awaits_setup()
        );
        if !applies {
            debug!(call_id = %session_id, "stale setup timer ignored");
            return;
        }
        let Some(session) = self.session.take() else { return };
        warn!(
            call_id = %session_id,
            timeout = ?self.config.setup_timeout,
            "call setup timed out"
        );
        self.teardown(session, CallState::Failed, EndReason::Timeout, true)
            .await;
    }

    // ===== teardown and plumbing =====

    /// The single teardown routine every exit path funnels through.
    ///
    /// Local tracks stop exactly once (the media guard is idempotent), the
    /// peer link close is idempotent, and the remote track references are
    /// dropped with the session. `notify` sends `end` only when the remote
    /// side did not originate the teardown.
    async fn teardown(
        &mut self,
        mut session: ActiveSession,
        terminal: CallState,
        reason: EndReason,
        notify: bool,
    ) {
        if let Some(timer) = session.timer.take() {
            timer.abort();
        }
        if let Some(media) = session.media.take() {
            media.stop();
        }
        if let Some(link) = session.link.take() {
            link.close().await;
        }

        let previous = session.info.state;
        session.info.state = terminal;
        session.info.ended_at = Some(Utc::now());
        session.info.remote_tracks.clear();
        let duration = session.info.duration();
        let info = session.info;

        self.publish();
        if notify {
            self.send_signal(SignalingEnvelope::end(
                info.remote.clone(),
                self.identity.clone(),
            ))
            .await;
        }
        info!(
            call_id = %info.session_id,
            remote = %info.remote,
            %previous,
            terminal = %terminal,
            ?reason,
            "call torn down"
        );
        self.emit(CallEvent::StateChanged {
            session: info.clone(),
            previous: Some(previous),
        });
        self.emit(CallEvent::CallEnded {
            session: info,
            reason,
            duration,
        });
    }

    fn arm_setup_timer(&self, session_id: SessionId) -> JoinHandle<()> {
        let tx = self.tx.clone();
        let timeout = self.config.setup_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(EngineInput::SetupTimeout { session_id }).await;
        })
    }

    /// Refresh the snapshot the handle reads
    fn publish(&self) {
        *self.current.write() = self.session.as_ref().map(|s| s.info.clone());
    }

    fn emit(&self, event: CallEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }

    /// Fire-and-forget: a failed send degrades the call, it does not end it
    async fn send_signal(&self, envelope: SignalingEnvelope) {
        if let Err(e) = self.transport.send(envelope).await {
            warn!(identity = %self.identity, "signaling send failed: {}", e);
            self.emit(CallEvent::Error { error: e.into() });
        }
    }
}
