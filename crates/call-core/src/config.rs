//! Call engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CallError, Result};

/// Default public STUN servers used when the deployment supplies none.
///
/// STUN only, no TURN: a NAT arrangement ICE cannot traverse surfaces as a
/// failed call, it is not relayed.
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Configuration for a [`CallEngine`](crate::CallEngine)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// STUN server URLs handed to the peer connection at construction
    pub stun_servers: Vec<String>,

    /// Upper bound on how long a session may sit in Calling, Ringing or
    /// Connecting before it is torn down as failed. Bounds the stall left
    /// by a lost signaling message.
    pub setup_timeout: Duration,

    /// Capacity of the UI-facing broadcast event channel
    pub event_capacity: usize,

    /// Capacity of the engine's internal serialized input queue
    pub queue_capacity: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            setup_timeout: Duration::from_secs(45),
            event_capacity: 64,
            queue_capacity: 128,
        }
    }
}

impl CallConfig {
    /// Check the configuration is usable before spawning an engine
    pub fn validate(&self) -> Result<()> {
        if self.stun_servers.is_empty() {
            return Err(CallError::negotiation("no STUN servers configured"));
        }
        if self.setup_timeout.is_zero() {
            return Err(CallError::negotiation("setup timeout must be non-zero"));
        }
        if self.event_capacity == 0 || self.queue_capacity == 0 {
            return Err(CallError::negotiation("channel capacities must be non-zero"));
        }
        Ok(())
    }
}
