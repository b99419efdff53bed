//! Codec for encoding and decoding signaling envelopes and channel frames.

use crate::chat::ChannelFrame;
use crate::envelope::SignalEnvelope;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum SignalCodecError {
    /// Message was not valid JSON or did not match the schema
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encode a signal envelope as JSON bytes
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn encode_envelope(envelope: &SignalEnvelope) -> Result<Vec<u8>, SignalCodecError> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Decode a signal envelope from JSON bytes
///
/// # Errors
///
/// Returns an error if the bytes are not a valid envelope
pub fn decode_envelope(data: &[u8]) -> Result<SignalEnvelope, SignalCodecError> {
    Ok(serde_json::from_slice(data)?)
}

/// Encode a data-channel frame as JSON bytes
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn encode_frame(frame: &ChannelFrame) -> Result<Vec<u8>, SignalCodecError> {
    Ok(serde_json::to_vec(frame)?)
}

/// Decode a data-channel frame from JSON bytes
///
/// # Errors
///
/// Returns an error if the bytes are not a valid frame
pub fn decode_frame(data: &[u8]) -> Result<ChannelFrame, SignalCodecError> {
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::chat::ChatMessage;
    use crate::envelope::Signal;
    use common::{MeetingId, PeerId};

    #[test]
    fn test_envelope_round_trip() {
        let envelope = SignalEnvelope::new(
            PeerId::from("alice"),
            PeerId::from("bob"),
            MeetingId::from("m-1"),
            Signal::Answer {
                sdp: "v=0\r\n".to_string(),
            },
        );

        let bytes = encode_envelope(&envelope).unwrap();
        let back = decode_envelope(&bytes).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let raw = br#"{"from":"a","to":"b","meeting_id":"m","type":"Telemetry"}"#;
        assert!(matches!(
            decode_envelope(raw),
            Err(SignalCodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_json() {
        let raw = br#"{"from":"a","to":"b"#;
        assert!(decode_envelope(raw).is_err());
    }

    #[test]
    fn test_frame_round_trip() {
        let frame = ChannelFrame::Chat {
            chat: ChatMessage {
                sender: PeerId::from("carol"),
                sender_name: "Carol".to_string(),
                text: "direct path".to_string(),
                timestamp: 42,
            },
        };

        let bytes = encode_frame(&frame).unwrap();
        let back = decode_frame(&bytes).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_frame_decode_rejects_envelope_json() {
        let raw = br#"{"from":"a","to":"b","meeting_id":"m","type":"Leave"}"#;
        assert!(decode_frame(raw).is_err());
    }
}
