//! Ordered buffering of ICE candidates.
//!
//! Candidates may arrive over signaling before the peer connection has a
//! remote description, or before a peer connection exists at all (the callee
//! is still ringing). They are queued in arrival order and applied in one
//! drain immediately after the remote description is set; afterwards the
//! buffer passes candidates straight through.

use peerline_signal_relay::CandidateInit;

/// FIFO holding area for candidates that arrived ahead of the remote
/// description. One buffer per session, drained exactly once.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    queued: Vec<CandidateInit>,
    drained: bool,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a received candidate to the buffer.
    ///
    /// Returns `None` while the buffer is still collecting (the candidate
    /// was queued), or `Some(candidate)` after the drain, meaning the caller
    /// must apply it to the peer connection immediately.
    pub fn push(&mut self, candidate: CandidateInit) -> Option<CandidateInit> {
        if self.drained {
            Some(candidate)
        } else {
            self.queued.push(candidate);
            None
        }
    }

    /// Take every queued candidate in arrival order and switch the buffer
    /// to pass-through. Called once, right after the remote description is
    /// applied.
    pub fn drain(&mut self) -> Vec<CandidateInit> {
        debug_assert!(!self.drained, "candidate buffer drained twice");
        self.drained = true;
        std::mem::take(&mut self.queued)
    }

    /// Number of candidates currently held
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    /// Whether the buffer is still collecting (remote description not set)
    pub fn is_buffering(&self) -> bool {
        !self.drained
    }
}
