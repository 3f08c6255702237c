//! Signaling relay adapter for peerline calls.
//!
//! Calls between two logged-in users negotiate their media session out of
//! band, over a pub/sub relay that fans messages out by recipient identity.
//! This crate owns the wire shape of those messages ([`SignalingEnvelope`])
//! and the narrow transport seam the call engine consumes
//! ([`SignalingTransport`]).
//!
//! Two transports are provided:
//!
//! - [`HttpRelaySignaling`]: sends via `POST /signal` on the relay service
//!   and exposes one inbound channel per subscribed identity, fed by the
//!   embedding application's pub/sub subscription callback.
//! - [`LocalRelay`]: an in-process fan-out used by tests and demos to wire
//!   two call engines together without a network.
//!
//! Delivery is fire-and-forget on every path: the relay gives no semantic
//! acknowledgment, and nothing here retries. A lost signaling message stalls
//! the call in its current state rather than failing it explicitly.

mod envelope;
mod error;
mod relay;
mod transport;

pub use envelope::{CandidateInit, Identity, MediaKind, SignalKind, SignalingEnvelope};
pub use error::{Result, SignalError};
pub use relay::{HttpRelaySignaling, LocalRelay};
pub use transport::SignalingTransport;
