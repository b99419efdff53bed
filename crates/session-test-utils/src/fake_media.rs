//! Capture device fakes.

use async_trait::async_trait;
use common::TrackId;
use meeting_session::ports::media::{
    LocalMediaTrack, MediaDevices, MediaError, MediaKind, ScreenCapture,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

static TRACK_SEQ: AtomicU64 = AtomicU64::new(1);

/// An inert local track that remembers its enabled/stopped state.
///
/// Tracks start enabled, matching a device that begins capturing as
/// soon as it is acquired.
#[derive(Debug)]
pub struct FakeLocalTrack {
    id: TrackId,
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl FakeLocalTrack {
    #[must_use]
    pub fn new(id: &str, kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: TrackId::from(id),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }

    /// A fresh audio track with a generated id.
    #[must_use]
    pub fn audio() -> Arc<Self> {
        let seq = TRACK_SEQ.fetch_add(1, Ordering::SeqCst);
        Self::new(&format!("audio-{seq}"), MediaKind::Audio)
    }

    /// A fresh video track with a generated id.
    #[must_use]
    pub fn video() -> Arc<Self> {
        let seq = TRACK_SEQ.fetch_add(1, Ordering::SeqCst);
        Self::new(&format!("video-{seq}"), MediaKind::Video)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalMediaTrack for FakeLocalTrack {
    fn id(&self) -> TrackId {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct DeviceState {
    mics: Vec<Arc<FakeLocalTrack>>,
    screens: Vec<Arc<FakeLocalTrack>>,
    /// Pending "capture ended" triggers, newest last
    screen_enders: Vec<oneshot::Sender<()>>,
}

/// Capture devices handing out [`FakeLocalTrack`]s.
#[derive(Default)]
pub struct FakeMediaDevices {
    state: Mutex<DeviceState>,
    fail_audio: AtomicBool,
    fail_screen: AtomicBool,
}

impl FakeMediaDevices {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make microphone acquisition fail, as a denied permission would.
    pub fn set_fail_audio(&self, fail: bool) {
        self.fail_audio.store(fail, Ordering::SeqCst);
    }

    /// Make screen capture acquisition fail.
    pub fn set_fail_screen(&self, fail: bool) {
        self.fail_screen.store(fail, Ordering::SeqCst);
    }

    /// Number of successful microphone acquisitions.
    pub fn audio_acquire_count(&self) -> usize {
        self.state.lock().unwrap().mics.len()
    }

    /// Number of successful screen capture acquisitions.
    pub fn screen_acquire_count(&self) -> usize {
        self.state.lock().unwrap().screens.len()
    }

    /// The most recently acquired microphone track.
    pub fn last_mic(&self) -> Option<Arc<FakeLocalTrack>> {
        self.state.lock().unwrap().mics.last().cloned()
    }

    /// The most recently acquired screen track.
    pub fn last_screen(&self) -> Option<Arc<FakeLocalTrack>> {
        self.state.lock().unwrap().screens.last().cloned()
    }

    /// Simulate the platform ending the newest screen capture, like
    /// the OS "stop sharing" button. Returns false if no capture is
    /// pending.
    pub fn end_screen_capture(&self) -> bool {
        let ender = self.state.lock().unwrap().screen_enders.pop();
        match ender {
            Some(ender) => ender.send(()).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl MediaDevices for FakeMediaDevices {
    async fn acquire_audio(&self) -> Result<Arc<dyn LocalMediaTrack>, MediaError> {
        if self.fail_audio.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied(
                "microphone access denied".to_string(),
            ));
        }
        let track = FakeLocalTrack::audio();
        self.state.lock().unwrap().mics.push(Arc::clone(&track));
        Ok(track)
    }

    async fn acquire_screen(&self) -> Result<ScreenCapture, MediaError> {
        if self.fail_screen.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied(
                "screen capture denied".to_string(),
            ));
        }
        let track = FakeLocalTrack::video();
        let (ender, ended) = oneshot::channel();
        {
            let mut state = self.state.lock().unwrap();
            state.screens.push(Arc::clone(&track));
            state.screen_enders.push(ender);
        }
        Ok(ScreenCapture { track, ended })
    }
}
