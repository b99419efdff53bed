//! Local media state: microphone, screen capture, and share tracking.

use crate::ports::media::{LocalMediaTrack, MediaDevices, MediaError, ScreenCapture};
use common::{PeerId, TrackId};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Who the current outbound screen share is visible to.
///
/// An [`Everyone`](ScreenShareGrant::Everyone) grant follows the
/// roster, so peers joining mid-share are covered too. A
/// [`Selected`](ScreenShareGrant::Selected) grant is fixed at start.
#[derive(Debug, Clone)]
pub enum ScreenShareGrant {
    Everyone,
    Selected(HashSet<PeerId>),
}

impl ScreenShareGrant {
    #[must_use]
    pub fn is_selective(&self) -> bool {
        matches!(self, ScreenShareGrant::Selected(_))
    }

    #[must_use]
    pub fn is_target(&self, peer_id: &PeerId) -> bool {
        match self {
            ScreenShareGrant::Everyone => true,
            ScreenShareGrant::Selected(targets) => targets.contains(peer_id),
        }
    }

    /// Drop a peer from a selected grant (it left the meeting).
    pub fn remove_target(&mut self, peer_id: &PeerId) {
        if let ScreenShareGrant::Selected(targets) = self {
            targets.remove(peer_id);
        }
    }
}

/// Owns local capture tracks and remembers who shares what.
pub struct MediaController {
    devices: Arc<dyn MediaDevices>,
    mic: Option<Arc<dyn LocalMediaTrack>>,
    screen: Option<Arc<dyn LocalMediaTrack>>,
    grant: Option<ScreenShareGrant>,
    /// Peers that announced an inbound screen share
    inbound_shares: HashSet<PeerId>,
}

impl MediaController {
    #[must_use]
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            mic: None,
            screen: None,
            grant: None,
            inbound_shares: HashSet::new(),
        }
    }

    /// Acquire the microphone if not already held.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be acquired.
    pub async fn ensure_audio(&mut self) -> Result<Arc<dyn LocalMediaTrack>, MediaError> {
        if let Some(mic) = &self.mic {
            return Ok(Arc::clone(mic));
        }
        let mic = self.devices.acquire_audio().await?;
        debug!(target: "session.media", track_id = %mic.id(), "Microphone acquired");
        self.mic = Some(Arc::clone(&mic));
        Ok(mic)
    }

    /// The held microphone track, if any
    #[must_use]
    pub fn mic(&self) -> Option<Arc<dyn LocalMediaTrack>> {
        self.mic.as_ref().map(Arc::clone)
    }

    /// Whether the microphone is currently sending
    #[must_use]
    pub fn mic_enabled(&self) -> bool {
        self.mic.as_ref().is_some_and(|mic| mic.is_enabled())
    }

    /// Flip the microphone mute state, acquiring the device on first
    /// use. Returns the new enabled state.
    ///
    /// The toggle that acquires the device leaves it sending.
    ///
    /// # Errors
    ///
    /// Returns an error if no microphone can be acquired.
    pub async fn toggle_mic(&mut self) -> Result<bool, MediaError> {
        let had_mic = self.mic.is_some();
        let mic = self.ensure_audio().await?;
        if !had_mic {
            if !mic.is_enabled() {
                mic.set_enabled(true).await;
            }
            return Ok(true);
        }
        let enabled = !mic.is_enabled();
        mic.set_enabled(enabled).await;
        Ok(enabled)
    }

    /// Start a screen capture. The caller must have stopped any
    /// previous share first.
    ///
    /// # Errors
    ///
    /// Returns an error if capture cannot start.
    pub async fn start_screen(&mut self) -> Result<ScreenCapture, MediaError> {
        let capture = self.devices.acquire_screen().await?;
        debug!(target: "session.media", track_id = %capture.track.id(), "Screen capture started");
        self.screen = Some(Arc::clone(&capture.track));
        Ok(capture)
    }

    /// The live screen track, if sharing
    #[must_use]
    pub fn screen(&self) -> Option<Arc<dyn LocalMediaTrack>> {
        self.screen.as_ref().map(Arc::clone)
    }

    /// Id of the live screen track, if sharing
    #[must_use]
    pub fn screen_track_id(&self) -> Option<TrackId> {
        self.screen.as_ref().map(|track| track.id())
    }

    #[must_use]
    pub fn is_sharing(&self) -> bool {
        self.screen.is_some()
    }

    /// Stop the screen capture and return the track that was live.
    pub async fn stop_screen(&mut self) -> Option<Arc<dyn LocalMediaTrack>> {
        let track = self.screen.take()?;
        track.stop().await;
        debug!(target: "session.media", track_id = %track.id(), "Screen capture stopped");
        Some(track)
    }

    pub fn set_grant(&mut self, grant: ScreenShareGrant) {
        self.grant = Some(grant);
    }

    #[must_use]
    pub fn grant(&self) -> Option<&ScreenShareGrant> {
        self.grant.as_ref()
    }

    pub fn grant_mut(&mut self) -> Option<&mut ScreenShareGrant> {
        self.grant.as_mut()
    }

    pub fn clear_grant(&mut self) -> Option<ScreenShareGrant> {
        self.grant.take()
    }

    /// Note that a peer announced an inbound share. Returns false if
    /// it was already recorded.
    pub fn record_remote_share(&mut self, peer_id: PeerId) -> bool {
        self.inbound_shares.insert(peer_id)
    }

    /// Forget a peer's inbound share. Returns whether one was recorded.
    pub fn clear_remote_share(&mut self, peer_id: &PeerId) -> bool {
        self.inbound_shares.remove(peer_id)
    }

    #[must_use]
    pub fn has_remote_share(&self, peer_id: &PeerId) -> bool {
        self.inbound_shares.contains(peer_id)
    }

    /// Stop every capture and forget all share state.
    pub async fn stop_all(&mut self) {
        if let Some(mic) = self.mic.take() {
            mic.stop().await;
        }
        if let Some(screen) = self.screen.take() {
            screen.stop().await;
        }
        self.grant = None;
        self.inbound_shares.clear();
    }
}

// Tests for this module use the `session-test-utils` fakes, which
// depend on this crate; they live in `tests/media_tests.rs` so they
// link the same crate instance as the fakes.
