//! Session event stream.
//!
//! Everything the embedder needs to render a meeting arrives here:
//! roster changes, media arrivals, chat, link state, invites, and
//! user-facing log lines. Events fan out over a broadcast channel so
//! any number of subscribers (UI, recorder, tests) can observe the
//! same stream; slow subscribers lag and skip rather than block the
//! session.

use crate::link::LinkState;
use crate::ports::media::MediaKind;
use chrono::{DateTime, Utc};
use common::{MeetingId, PeerId};
use signaling_protocol::ChatMessage;
use tokio::sync::broadcast;
use tracing::trace;

/// Severity of a user-facing log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// An invitation received from another peer, pending a local decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingInvite {
    /// Meeting the invite is for
    pub meeting_id: MeetingId,
    /// Peer that sent the invite
    pub host: PeerId,
    /// Display name the host advertised
    pub host_name: String,
}

/// Why a participant left the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The peer announced it was leaving
    Left,
    /// Reconnect attempts were exhausted
    Unreachable,
}

/// Event observable by session subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A peer joined the roster
    ParticipantAdded {
        peer_id: PeerId,
        display_name: String,
    },
    /// A peer left the roster
    ParticipantRemoved {
        peer_id: PeerId,
        reason: RemovalReason,
    },
    /// A remote media track appeared (`active`) or went away
    IncomingMedia {
        peer_id: PeerId,
        kind: MediaKind,
        active: bool,
    },
    /// A chat message passed dedup and entered the history
    ChatReceived { message: ChatMessage },
    /// A peer link changed state
    LinkStateChanged { peer_id: PeerId, state: LinkState },
    /// Another peer invited us to a meeting
    InviteReceived { invite: IncomingInvite },
    /// A peer declined our invitation
    InviteDeclined { peer_id: PeerId },
    /// A peer started or stopped screen sharing toward us
    ScreenShareChanged { peer_id: PeerId, sharing: bool },
    /// A peer announced an upcoming selective share (advisory)
    ScreenShareInvited { peer_id: PeerId, host_name: String },
    /// The meeting is over for this session
    MeetingEnded { meeting_id: MeetingId },
    /// A user-facing condition worth surfacing outside the meeting UI
    Log {
        at: DateTime<Utc>,
        level: LogLevel,
        message: String,
    },
}

/// Broadcast sender for session events.
#[derive(Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    /// Create a stream with the given buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to the stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Having no subscribers is normal (headless operation); the
    /// event is simply dropped.
    pub fn emit(&self, event: SessionEvent) {
        if self.sender.send(event).is_err() {
            trace!(target: "session.events", "No subscribers for event");
        }
    }

    /// Emit a user-facing log event.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(SessionEvent::Log {
            at: Utc::now(),
            level,
            message: message.into(),
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_every_subscriber() {
        let events = SessionEvents::new(8);
        let mut first = events.subscribe();
        let mut second = events.subscribe();

        events.emit(SessionEvent::InviteDeclined {
            peer_id: PeerId::from("bob"),
        });

        assert!(matches!(
            first.recv().await.unwrap(),
            SessionEvent::InviteDeclined { .. }
        ));
        assert!(matches!(
            second.recv().await.unwrap(),
            SessionEvent::InviteDeclined { .. }
        ));
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let events = SessionEvents::new(8);
        events.log(LogLevel::Warn, "no peers reachable");
        // Nothing to assert beyond not panicking; a later subscriber
        // must not see the earlier event.
        let mut late = events.subscribe();
        events.log(LogLevel::Info, "fresh");
        let event = late.recv().await.unwrap();
        assert!(
            matches!(
                &event,
                SessionEvent::Log { message, level, .. }
                    if message == "fresh" && *level == LogLevel::Info
            ),
            "unexpected event: {event:?}"
        );
    }
}
