//! Local media capture port.

use async_trait::async_trait;
use common::TrackId;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

/// Kind of media carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Microphone audio
    Audio,
    /// Screen or camera video
    Video,
}

impl MediaKind {
    /// Short name for logging
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Error type for capture operations
#[derive(Debug, Error)]
pub enum MediaError {
    /// The user or platform denied access to the device
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No matching capture device exists
    #[error("Device not found: {0}")]
    NotFound(String),

    /// The device exists but capture could not start
    #[error("Capture failed: {0}")]
    Capture(String),
}

/// Handle to a locally captured media track (enables mocking).
#[async_trait]
pub trait LocalMediaTrack: Send + Sync {
    /// Stable identifier for this track
    fn id(&self) -> TrackId;

    /// Kind of media the track carries
    fn kind(&self) -> MediaKind;

    /// Enable or disable the track without tearing it down.
    ///
    /// Disabled tracks keep their device and transport bindings; peers
    /// observe silence or frozen video until re-enabled.
    async fn set_enabled(&self, enabled: bool);

    /// Whether the track is currently enabled
    fn is_enabled(&self) -> bool;

    /// Stop capture and release the device
    async fn stop(&self);
}

/// A started screen capture.
///
/// `ended` fires if the platform stops the capture from outside
/// (e.g. the user clicks the OS "stop sharing" affordance); it stays
/// silent when the track is stopped through [`LocalMediaTrack::stop`].
pub struct ScreenCapture {
    /// The captured video track
    pub track: Arc<dyn LocalMediaTrack>,
    /// Fires on externally initiated capture end
    pub ended: oneshot::Receiver<()>,
}

/// Trait for local capture devices (enables mocking).
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire the microphone.
    ///
    /// # Errors
    ///
    /// Returns an error if no usable device is available.
    async fn acquire_audio(&self) -> Result<Arc<dyn LocalMediaTrack>, MediaError>;

    /// Acquire a screen capture.
    ///
    /// # Errors
    ///
    /// Returns an error if capture cannot start.
    async fn acquire_screen(&self) -> Result<ScreenCapture, MediaError>;
}
