//! Chat relay with duplicate suppression.
//!
//! Chat rides two paths at once: the data channel when it is open, and
//! the signaling fallback always. Receivers therefore see most
//! messages twice and deduplicate on (sender, timestamp) before
//! surfacing anything.

use common::PeerId;
use signaling_protocol::ChatMessage;
use std::collections::HashSet;

/// Meeting-scoped chat history and duplicate filter.
#[derive(Default)]
pub struct ChatRelay {
    history: Vec<ChatMessage>,
    seen: HashSet<(PeerId, i64)>,
}

impl ChatRelay {
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Record a message. Returns false if it was already seen, in
    /// which case it must not be surfaced again.
    pub fn record(&mut self, message: &ChatMessage) -> bool {
        if !self.seen.insert(message.dedup_key()) {
            return false;
        }
        self.history.push(message.clone());
        true
    }

    /// Messages accepted so far, in arrival order
    #[must_use]
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Drop the history and the duplicate filter.
    pub fn clear(&mut self) {
        self.history.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn message(sender: &str, timestamp: i64, text: &str) -> ChatMessage {
        ChatMessage {
            sender: PeerId::from(sender),
            sender_name: sender.to_string(),
            text: text.to_string(),
            timestamp,
        }
    }

    #[test]
    fn test_duplicate_is_suppressed() {
        let mut relay = ChatRelay::new();
        let msg = message("alice", 1_700_000_000_000, "hello");

        assert!(relay.record(&msg));
        // Same message arriving on the second path
        assert!(!relay.record(&msg));
        assert_eq!(relay.len(), 1);
    }

    #[test]
    fn test_same_timestamp_different_sender_both_kept() {
        let mut relay = ChatRelay::new();

        assert!(relay.record(&message("alice", 42, "hi")));
        assert!(relay.record(&message("bob", 42, "hi")));
        assert_eq!(relay.len(), 2);
    }

    #[test]
    fn test_clear_resets_filter() {
        let mut relay = ChatRelay::new();
        let msg = message("alice", 42, "hi");

        assert!(relay.record(&msg));
        relay.clear();
        assert!(relay.is_empty());
        // A new meeting starts with a fresh filter
        assert!(relay.record(&msg));
    }
}
