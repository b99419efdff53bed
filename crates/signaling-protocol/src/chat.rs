//! Chat message and data-channel frame types.

use common::PeerId;
use serde::{Deserialize, Serialize};

/// A single chat message.
///
/// Chat travels over two paths at once (data channel and signaling),
/// so `(sender, timestamp)` acts as the receiver-side dedup key.
/// Field names are camelCase on the wire to interoperate with peers
/// that mint `Date.now()`-style payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Peer id of the author
    pub sender: PeerId,
    /// Display name of the author at send time
    pub sender_name: String,
    /// Message body
    pub text: String,
    /// Author's wall clock, milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl ChatMessage {
    /// Key identifying this message across both delivery paths
    #[must_use]
    pub fn dedup_key(&self) -> (PeerId, i64) {
        (self.sender.clone(), self.timestamp)
    }
}

/// Payload carried over a meeting data channel, tagged by `type`.
///
/// Chat is the only frame today; the tag leaves room for more without
/// breaking old receivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelFrame {
    /// Chat message via the direct path
    Chat {
        /// The chat payload
        chat: ChatMessage,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn message() -> ChatMessage {
        ChatMessage {
            sender: PeerId::from("alice"),
            sender_name: "Alice".to_string(),
            text: "hello".to_string(),
            timestamp: 1_700_000_000_123,
        }
    }

    #[test]
    fn test_chat_fields_are_camel_case() {
        let json = serde_json::to_value(message()).unwrap();
        assert_eq!(json["sender"], "alice");
        assert_eq!(json["senderName"], "Alice");
        assert_eq!(json["text"], "hello");
        assert_eq!(json["timestamp"], 1_700_000_000_123_i64);
    }

    #[test]
    fn test_dedup_key_ignores_text_and_name() {
        let a = message();
        let mut b = message();
        b.text = "edited".to_string();
        b.sender_name = "A.".to_string();
        assert_eq!(a.dedup_key(), b.dedup_key());

        let mut c = message();
        c.timestamp += 1;
        assert_ne!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn test_channel_frame_round_trip() {
        let frame = ChannelFrame::Chat { chat: message() };
        let json = serde_json::to_string(&frame).unwrap();
        let back: ChannelFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }
}
