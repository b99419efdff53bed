//! Signal envelope and payload types.

use crate::chat::ChatMessage;
use common::{MeetingId, PeerId};
use serde::{Deserialize, Serialize};

/// An addressed, meeting-scoped signaling message.
///
/// The payload is flattened into the envelope on the wire, so a JSON
/// message looks like:
///
/// ```json
/// {"from":"a","to":"b","meeting_id":"m","type":"Offer","sdp":"..."}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// Sending peer
    pub from: PeerId,
    /// Receiving peer
    pub to: PeerId,
    /// Meeting the message belongs to
    pub meeting_id: MeetingId,
    /// Message payload, tagged by `type`
    #[serde(flatten)]
    pub signal: Signal,
}

impl SignalEnvelope {
    /// Build an envelope addressed from one peer to another
    #[must_use]
    pub fn new(from: PeerId, to: PeerId, meeting_id: MeetingId, signal: Signal) -> Self {
        Self {
            from,
            to,
            meeting_id,
            signal,
        }
    }
}

/// Signal payload variants.
///
/// Tag values are the variant names; fields are snake_case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Signal {
    /// Invitation to join a meeting
    Invite {
        /// Display name of the inviting host
        host_name: String,
    },
    /// Accept or decline an invitation
    InviteResponse {
        /// Whether the invite was accepted
        accepted: bool,
        /// Display name of the responder, when accepting
        #[serde(default)]
        username: Option<String>,
    },
    /// SDP offer
    Offer {
        /// Session description in SDP form
        sdp: String,
    },
    /// SDP answer
    Answer {
        /// Session description in SDP form
        sdp: String,
    },
    /// Trickled ICE candidate
    IceCandidate {
        /// Candidate line
        candidate: String,
        /// Media stream identification tag, when present
        sdp_mid: Option<String>,
        /// Media line index, when present
        sdp_mline_index: Option<u32>,
    },
    /// Chat message via the signaling fallback path
    Chat {
        /// The chat payload
        chat: ChatMessage,
    },
    /// Sender has left the meeting
    Leave,
    /// Host has ended the meeting
    Ended,
    /// Screen share started or stopped by the sender
    ScreenShare {
        /// True when the sender is now sharing
        sharing: bool,
    },
    /// Advisory heads-up that a selective share is about to start
    ScreenShareInvite {
        /// Display name of the sharing host
        host_name: String,
    },
    /// Request to join the meeting identified by the envelope's code
    RejoinRequest {
        /// Display name of the requester
        username: String,
    },
    /// Current roster, sent to a joining peer
    ParticipantList {
        /// Peer ids of every current participant
        participants: Vec<PeerId>,
    },
}

impl Signal {
    /// Short name of the payload type, for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invite { .. } => "Invite",
            Self::InviteResponse { .. } => "InviteResponse",
            Self::Offer { .. } => "Offer",
            Self::Answer { .. } => "Answer",
            Self::IceCandidate { .. } => "IceCandidate",
            Self::Chat { .. } => "Chat",
            Self::Leave => "Leave",
            Self::Ended => "Ended",
            Self::ScreenShare { .. } => "ScreenShare",
            Self::ScreenShareInvite { .. } => "ScreenShareInvite",
            Self::RejoinRequest { .. } => "RejoinRequest",
            Self::ParticipantList { .. } => "ParticipantList",
        }
    }
}
