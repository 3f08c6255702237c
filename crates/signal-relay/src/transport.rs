//! The transport seam between the call engine and the relay.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::envelope::SignalingEnvelope;
use crate::error::Result;

/// A fire-and-forget signaling transport.
///
/// Implementations route envelopes by recipient identity. `send` returns as
/// soon as the relay accepts (or refuses) the message; there is no delivery
/// acknowledgment and no retry, so the caller treats a send error as a
/// degraded call, not a fatal one.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Open this identity's inbound channel.
    ///
    /// Subscribing again for the same identity replaces the previous
    /// channel; the old receiver simply stops yielding.
    async fn subscribe(&self, identity: &str) -> Result<mpsc::Receiver<SignalingEnvelope>>;

    /// Hand one envelope to the relay for fan-out to `envelope.to`.
    async fn send(&self, envelope: SignalingEnvelope) -> Result<()>;
}
