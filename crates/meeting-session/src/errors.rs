//! Session error types.
//!
//! Errors returned to callers of [`SessionHandle`](crate::SessionHandle)
//! operations. Failures inside the session loop (lost peers, failed
//! negotiations, unreachable signaling) are logged and handled by the
//! retry machinery instead of surfacing here; nothing in this crate
//! panics.

use thiserror::Error;

/// Meeting session error type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation requires an active meeting.
    #[error("No active meeting")]
    NoActiveMeeting,

    /// A meeting is already active on this session.
    #[error("Already in meeting {0}")]
    AlreadyInMeeting(String),

    /// Operation is restricted to the meeting host.
    #[error("Only the host may {0}")]
    NotHost(String),

    /// The caller passed input the operation cannot act on.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Media device acquisition failed.
    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    /// Transport-level failure while setting up a connection.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Signaling message could not be encoded or sent.
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// The session actor has shut down.
    #[error("Session closed")]
    SessionClosed,
}

impl SessionError {
    /// Whether retrying the same operation later can reasonably succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Transport(_) | SessionError::Signaling(_))
    }

    /// Returns a message suitable for direct display to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            SessionError::NoActiveMeeting => "Join a meeting first".to_string(),
            SessionError::AlreadyInMeeting(_) => "Leave the current meeting first".to_string(),
            SessionError::NotHost(action) => format!("Only the host may {action}"),
            SessionError::InvalidRequest(reason) => reason.clone(),
            SessionError::MediaUnavailable(_) => {
                "Microphone or screen capture is unavailable".to_string()
            }
            SessionError::Transport(_) | SessionError::Signaling(_) => {
                "Connection problem, please try again".to_string()
            }
            SessionError::SessionClosed => "The session has ended".to_string(),
        }
    }
}
