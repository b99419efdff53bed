//! Pending ICE candidate queue.
//!
//! Candidates trickle in as soon as the peer generates them, which can
//! be before our transport has a remote description; applying them
//! that early is rejected by every stack. The queue buffers those
//! arrivals and releases them exactly once, in arrival order, right
//! after the remote description lands. Candidates arriving after the
//! flush apply directly.

use crate::ports::rtc::IceCandidateInit;

/// Arrival-ordered buffer of not-yet-applicable remote candidates.
#[derive(Debug, Default)]
pub struct IceQueue {
    pending: Vec<IceCandidateInit>,
    flushed: bool,
}

impl IceQueue {
    /// Create an empty, unflushed queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the one-time flush has happened.
    ///
    /// Once true, new candidates must be applied directly instead of
    /// queued.
    #[must_use]
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Buffer a candidate that arrived before the remote description.
    pub fn push(&mut self, candidate: IceCandidateInit) {
        self.pending.push(candidate);
    }

    /// Release all buffered candidates in arrival order.
    ///
    /// Marks the queue flushed; a second call yields nothing.
    pub fn drain(&mut self) -> Vec<IceCandidateInit> {
        self.flushed = true;
        std::mem::take(&mut self.pending)
    }

    /// Number of buffered candidates
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
