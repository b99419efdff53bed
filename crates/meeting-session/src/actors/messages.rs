//! Messages accepted by the session loop.

use crate::errors::SessionError;
use crate::events::IncomingInvite;
use crate::link::LinkState;
use crate::roster::Participant;
use common::{MeetingId, PeerId, TrackId};
use signaling_protocol::{ChatMessage, SignalEnvelope};
use tokio::sync::oneshot;

/// Role this endpoint plays in the active meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetingRole {
    /// Created the meeting; invites peers and can end it for everyone
    Host,
    /// Joined someone else's meeting
    Guest,
}

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No meeting
    Lobby,
    /// Hosting a meeting no one has joined yet
    Hosting,
    /// Joining a meeting, waiting for the first peer connection
    Joining,
    /// In a meeting with at least one other participant
    Active,
}

/// The active meeting as seen by this endpoint.
#[derive(Debug, Clone)]
pub struct Meeting {
    /// Meeting identifier, doubling as the join code
    pub id: MeetingId,
    /// Our role in it
    pub role: MeetingRole,
}

/// Point-in-time view of the session for UIs and tests.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub meeting: Option<Meeting>,
    pub participants: Vec<Participant>,
    pub links: Vec<(PeerId, LinkState)>,
    pub chat: Vec<ChatMessage>,
    pub pending_retries: usize,
    pub mic_enabled: bool,
    pub sharing: bool,
}

/// Commands sent from a [`SessionHandle`](crate::SessionHandle) to the
/// session loop.
#[derive(Debug)]
pub enum SessionCommand {
    CreateMeeting {
        respond_to: oneshot::Sender<Result<MeetingId, SessionError>>,
    },
    JoinByCode {
        code: String,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    Invite {
        peers: Vec<PeerId>,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    AcceptInvite {
        invite: IncomingInvite,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    DeclineInvite {
        invite: IncomingInvite,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    Leave {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    SendChat {
        text: String,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    ToggleMic {
        respond_to: oneshot::Sender<Result<bool, SessionError>>,
    },
    StartScreenShare {
        /// `None` shares to every participant
        targets: Option<Vec<PeerId>>,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    StopScreenShare {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    /// An envelope arrived from the signaling layer. Fire and forget.
    DeliverSignal { envelope: SignalEnvelope },
    Snapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
}

/// Signals posted back into the loop by its own helper tasks.
#[derive(Debug)]
pub enum InternalEvent {
    /// A scheduled reconnect attempt for the peer is due
    RetryDue { peer_id: PeerId },
    /// The platform ended the screen capture from outside
    ScreenCaptureEnded { track_id: TrackId },
}
