//! `MediaController` device acquisition and share-state tests.
//!
//! These live as integration tests rather than unit tests in
//! `src/media.rs` because they use the `session-test-utils` fakes:
//! that crate depends on `meeting-session`, so the lib-test build
//! would see a second copy of the crate and its port traits.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::PeerId;
use meeting_session::media::{MediaController, ScreenShareGrant};
use session_test_utils::FakeMediaDevices;

#[tokio::test]
async fn test_ensure_audio_is_idempotent() {
    let devices = FakeMediaDevices::new();
    let mut media = MediaController::new(devices.clone());

    let first = media.ensure_audio().await.unwrap();
    let second = media.ensure_audio().await.unwrap();
    assert_eq!(first.id(), second.id());
    assert_eq!(devices.audio_acquire_count(), 1);
}

#[tokio::test]
async fn test_toggle_mic_acquires_then_flips() {
    let devices = FakeMediaDevices::new();
    let mut media = MediaController::new(devices.clone());

    // The toggle that acquires the device leaves it sending
    assert!(media.toggle_mic().await.unwrap());
    assert!(media.mic_enabled());
    assert_eq!(devices.audio_acquire_count(), 1);

    assert!(!media.toggle_mic().await.unwrap());
    assert!(!media.mic_enabled());
    assert!(media.toggle_mic().await.unwrap());
    assert!(media.mic_enabled());
    assert_eq!(devices.audio_acquire_count(), 1);
}

#[tokio::test]
async fn test_stop_all_releases_devices() {
    let devices = FakeMediaDevices::new();
    let mut media = MediaController::new(devices.clone());

    media.ensure_audio().await.unwrap();
    let capture = media.start_screen().await.unwrap();
    media.set_grant(ScreenShareGrant::Everyone);

    media.stop_all().await;
    assert!(media.mic().is_none());
    assert!(!media.is_sharing());
    assert!(media.grant().is_none());
    assert!(devices.last_screen().unwrap().is_stopped());
    drop(capture);
}

#[test]
fn test_everyone_grant_covers_new_peers() {
    let grant = ScreenShareGrant::Everyone;
    assert!(grant.is_target(&PeerId::from("anyone")));
    assert!(!grant.is_selective());

    let mut selected: ScreenShareGrant =
        ScreenShareGrant::Selected([PeerId::from("bob")].into_iter().collect());
    assert!(selected.is_selective());
    assert!(selected.is_target(&PeerId::from("bob")));
    assert!(!selected.is_target(&PeerId::from("carol")));
    selected.remove_target(&PeerId::from("bob"));
    assert!(!selected.is_target(&PeerId::from("bob")));
}

#[tokio::test]
async fn test_remote_share_tracking() {
    let devices = FakeMediaDevices::new();
    let mut media = MediaController::new(devices);
    let peer = PeerId::from("bob");

    assert!(media.record_remote_share(peer.clone()));
    assert!(!media.record_remote_share(peer.clone()));
    assert!(media.has_remote_share(&peer));
    assert!(media.clear_remote_share(&peer));
    assert!(!media.has_remote_share(&peer));
}
