//! Two call engines in one process, wired through the in-memory relay.
//!
//! Alice places a voice call to Bob, Bob accepts, both sides report the
//! connected session, then Alice hangs up. Run with:
//!
//! ```sh
//! cargo run --example p2p_call
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use peerline_call_core::{
    CallConfig, CallEngine, CallEvent, CallState, MediaKind, MediaSource, PeerLinkFactory,
    SampleMediaSource, WebRtcLinkFactory,
};
use peerline_signal_relay::{LocalRelay, SignalingTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,webrtc=warn".into()),
        )
        .init();

    let relay = Arc::new(LocalRelay::new());

    let alice = CallEngine::spawn(
        "alice@example.com",
        CallConfig::default(),
        Arc::clone(&relay) as Arc<dyn SignalingTransport>,
        Arc::new(SampleMediaSource::new()) as Arc<dyn MediaSource>,
        Arc::new(WebRtcLinkFactory::new()) as Arc<dyn PeerLinkFactory>,
    )
    .await
    .context("spawn alice")?;

    let bob = CallEngine::spawn(
        "bob@example.com",
        CallConfig::default(),
        Arc::clone(&relay) as Arc<dyn SignalingTransport>,
        Arc::new(SampleMediaSource::new()) as Arc<dyn MediaSource>,
        Arc::new(WebRtcLinkFactory::new()) as Arc<dyn PeerLinkFactory>,
    )
    .await
    .context("spawn bob")?;

    // Bob answers whatever rings.
    let bob_ui = bob.clone();
    let mut bob_events = bob.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = bob_events.recv().await {
            match event {
                CallEvent::IncomingCall { session } => {
                    info!(from = %session.remote, "bob: ringing, accepting");
                    if let Err(e) = bob_ui.accept().await {
                        info!("bob: accept failed: {e}");
                    }
                }
                CallEvent::StateChanged { session, .. }
                    if session.state == CallState::Connected =>
                {
                    info!("bob: connected");
                }
                CallEvent::CallEnded { reason, .. } => {
                    info!(?reason, "bob: call ended");
                }
                _ => {}
            }
        }
    });

    let mut alice_events = alice.subscribe();
    let session = alice.start_call("bob@example.com", MediaKind::Voice).await?;
    info!(call_id = %session.session_id, "alice: calling bob");

    // Wait for the call to connect (loopback ICE is quick), then hang up.
    let connected = async {
        loop {
            if let Ok(CallEvent::StateChanged { session, .. }) = alice_events.recv().await {
                if session.state == CallState::Connected {
                    return session;
                }
            }
        }
    };
    let session = tokio::time::timeout(Duration::from_secs(30), connected)
        .await
        .context("call did not connect")?;
    info!(
        call_id = %session.session_id,
        connected_at = ?session.connected_at,
        "alice: connected"
    );

    tokio::time::sleep(Duration::from_secs(2)).await;
    alice.hangup().await?;
    info!("alice: hung up");

    alice.shutdown().await?;
    bob.shutdown().await?;
    Ok(())
}
