//! Relay transport implementations.
//!
//! `HttpRelaySignaling` is the production adapter: outbound envelopes go to
//! the relay service's `POST /signal` endpoint, inbound envelopes arrive
//! through `deliver`, called by whatever pub/sub subscription the embedding
//! application holds. `LocalRelay` short-circuits both halves in-process for
//! tests and demos.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::envelope::{Identity, SignalingEnvelope};
use crate::error::{Result, SignalError};
use crate::transport::SignalingTransport;

const DEFAULT_INBOX_CAPACITY: usize = 64;

/// Route an envelope into the per-identity inbox map shared by both
/// transports. Relay semantics: an unknown or saturated recipient drops the
/// message, it does not error.
fn route(
    inboxes: &DashMap<Identity, mpsc::Sender<SignalingEnvelope>>,
    envelope: SignalingEnvelope,
) {
    match inboxes.get(&envelope.to) {
        Some(tx) => {
            if let Err(e) = tx.try_send(envelope) {
                warn!("inbound signal dropped, inbox closed or full: {}", e);
            }
        }
        None => {
            warn!(to = %envelope.to, kind = %envelope.kind, "inbound signal for unsubscribed identity dropped");
        }
    }
}

/// HTTP-backed relay adapter.
///
/// The relay transport itself (websocket, SSE, vendor SDK) lives outside
/// this crate; it pushes received messages in via [`HttpRelaySignaling::deliver`].
pub struct HttpRelaySignaling {
    http: reqwest::Client,
    base_url: String,
    inboxes: DashMap<Identity, mpsc::Sender<SignalingEnvelope>>,
    capacity: usize,
}

impl HttpRelaySignaling {
    /// Create an adapter sending to `{base_url}/signal`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            inboxes: DashMap::new(),
            capacity: DEFAULT_INBOX_CAPACITY,
        }
    }

    /// Feed one inbound envelope from the pub/sub subscription into the
    /// recipient's channel.
    pub fn deliver(&self, envelope: SignalingEnvelope) {
        route(&self.inboxes, envelope);
    }
}

#[async_trait]
impl SignalingTransport for HttpRelaySignaling {
    async fn subscribe(&self, identity: &str) -> Result<mpsc::Receiver<SignalingEnvelope>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.inboxes.insert(identity.to_owned(), tx);
        debug!(identity, "subscribed to inbound signaling channel");
        Ok(rx)
    }

    async fn send(&self, envelope: SignalingEnvelope) -> Result<()> {
        let url = format!("{}/signal", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| SignalError::delivery(e.to_string()))?;

        // Only transport-level success matters; the body carries no
        // semantic acknowledgment.
        response
            .error_for_status()
            .map_err(|e| SignalError::delivery(e.to_string()))?;
        Ok(())
    }
}

/// In-process relay: fan-out by identity over tokio channels.
///
/// Shared (via `Arc`) between every party in a test or demo. Matches the
/// real relay's contract, including silently dropping messages for unknown
/// recipients.
pub struct LocalRelay {
    inboxes: DashMap<Identity, mpsc::Sender<SignalingEnvelope>>,
    capacity: usize,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self {
            inboxes: DashMap::new(),
            capacity: DEFAULT_INBOX_CAPACITY,
        }
    }
}

#[async_trait]
impl SignalingTransport for LocalRelay {
    async fn subscribe(&self, identity: &str) -> Result<mpsc::Receiver<SignalingEnvelope>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.inboxes.insert(identity.to_owned(), tx);
        debug!(identity, "subscribed to local relay");
        Ok(rx)
    }

    async fn send(&self, envelope: SignalingEnvelope) -> Result<()> {
        debug!(to = %envelope.to, from = %envelope.from, kind = %envelope.kind, "relaying signal");
        route(&self.inboxes, envelope);
        Ok(())
    }
}
