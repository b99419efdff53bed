//! End-to-end meeting lifecycle tests.
//!
//! Runs several full session loops against the in-process fakes to
//! verify:
//! - Invite, accept, and decline flows
//! - Join-by-code, with and without reachable peers
//! - Guest leave versus the host ending the meeting
//! - Microphone toggling mid-meeting

#![allow(clippy::unwrap_used, clippy::expect_used)]

use meeting_session::ports::media::LocalMediaTrack;
use meeting_session::{
    LinkState, LogLevel, MeetingRole, RemovalReason, SessionError, SessionEvent, SessionPhase,
};
use session_test_utils::{
    establish, invite_join, join_pair, populate_directory, wait_until, FakeSignalingHub, TestPeer,
};
use signaling_protocol::Signal;

// ============================================================================
// Invite flow
// ============================================================================

#[tokio::test]
async fn test_invite_accept_builds_connected_pair() {
    let hub = FakeSignalingHub::new();
    let alice = TestPeer::spawn("alice", &hub).await;
    let mut bob = TestPeer::spawn("bob", &hub).await;

    let meeting_id = alice.handle.create_meeting().await.unwrap();
    let hosting = alice.snapshot().await;
    assert_eq!(hosting.phase, SessionPhase::Hosting);
    assert!(hosting.mic_enabled);
    assert!(hosting.participants.is_empty());

    alice.handle.invite(vec![bob.id.clone()]).await.unwrap();
    let event = bob
        .wait_for("the invite", |event| {
            matches!(event, SessionEvent::InviteReceived { .. })
        })
        .await;
    let invite = match event {
        SessionEvent::InviteReceived { invite } => invite,
        _ => unreachable!("wait_for returned a non-matching event"),
    };
    assert_eq!(invite.meeting_id, meeting_id);
    assert_eq!(invite.host, alice.id);
    assert_eq!(invite.host_name, "Alice");

    bob.handle.accept_invite(invite).await.unwrap();

    bob.wait_snapshot("a link toward the host", |snapshot| {
        !snapshot.links.is_empty()
    })
    .await;
    let alice_transport = alice.transport_to(&bob.id);
    wait_until("the answer to apply", || {
        !alice_transport.remote_descriptions().is_empty()
    })
    .await;
    establish(&alice, &bob).await;

    let host_view = alice
        .wait_snapshot("the guest link connecting", |snapshot| {
            snapshot
                .links
                .iter()
                .any(|(peer_id, state)| *peer_id == bob.id && *state == LinkState::Connected)
        })
        .await;
    assert_eq!(host_view.phase, SessionPhase::Active);
    assert_eq!(host_view.participants.len(), 1);
    assert_eq!(
        host_view.participants.first().unwrap().display_name,
        "Bob"
    );

    let guest_view = bob
        .wait_snapshot("the host link connecting", |snapshot| {
            snapshot
                .links
                .iter()
                .any(|(peer_id, state)| *peer_id == alice.id && *state == LinkState::Connected)
        })
        .await;
    assert_eq!(guest_view.phase, SessionPhase::Active);
    let meeting = guest_view.meeting.expect("guest should be in the meeting");
    assert_eq!(meeting.id, meeting_id);
    assert_eq!(meeting.role, MeetingRole::Guest);
    assert_eq!(
        guest_view.participants.first().unwrap().display_name,
        "Alice"
    );

    // The initiator carries its mic and opens the data channel; the
    // responder carries its mic back on the answered transport
    assert_eq!(alice_transport.added_tracks().len(), 1);
    assert_eq!(alice_transport.channels().len(), 1);
    assert_eq!(bob.transport_to(&alice.id).added_tracks().len(), 1);
}

#[tokio::test]
async fn test_declined_invite_reaches_host() {
    let hub = FakeSignalingHub::new();
    let mut alice = TestPeer::spawn("alice", &hub).await;
    let mut bob = TestPeer::spawn("bob", &hub).await;

    alice.handle.create_meeting().await.unwrap();
    alice.handle.invite(vec![bob.id.clone()]).await.unwrap();
    let event = bob
        .wait_for("the invite", |event| {
            matches!(event, SessionEvent::InviteReceived { .. })
        })
        .await;
    let invite = match event {
        SessionEvent::InviteReceived { invite } => invite,
        _ => unreachable!("wait_for returned a non-matching event"),
    };
    bob.handle.decline_invite(invite).await.unwrap();

    let declined = alice
        .wait_for("the decline", |event| {
            matches!(event, SessionEvent::InviteDeclined { .. })
        })
        .await;
    assert!(
        matches!(&declined, SessionEvent::InviteDeclined { peer_id } if *peer_id == bob.id),
        "unexpected event: {declined:?}"
    );

    // The decliner never joined anything
    let guest_view = bob.snapshot().await;
    assert_eq!(guest_view.phase, SessionPhase::Lobby);
    assert!(guest_view.meeting.is_none());
    assert_eq!(bob.factory.created_count(), 0);

    let host_view = alice.snapshot().await;
    assert_eq!(host_view.phase, SessionPhase::Hosting);
    assert!(host_view.participants.is_empty());
}

#[tokio::test]
async fn test_unreachable_invitee_stays_on_the_roster() {
    let hub = FakeSignalingHub::new();
    let mut alice = TestPeer::spawn("alice", &hub).await;
    let mut bob = TestPeer::spawn("bob", &hub).await;

    alice.handle.create_meeting().await.unwrap();
    alice.handle.invite(vec![bob.id.clone()]).await.unwrap();
    let event = bob
        .wait_for("the invite", |event| {
            matches!(event, SessionEvent::InviteReceived { .. })
        })
        .await;
    let invite = match event {
        SessionEvent::InviteReceived { invite } => invite,
        _ => unreachable!("wait_for returned a non-matching event"),
    };

    // The host's transport stack goes down before the acceptance lands
    alice.factory.set_fail_create(true);
    bob.handle.accept_invite(invite).await.unwrap();

    alice
        .wait_for("the reachability warning", |event| {
            matches!(
                event,
                SessionEvent::Log { message, level: LogLevel::Warn, .. }
                    if message.contains("Could not reach")
            )
        })
        .await;

    // Bob is kept so a later retry or rejoin can still link him up
    let host_view = alice.snapshot().await;
    assert!(host_view
        .participants
        .iter()
        .any(|participant| participant.peer_id == bob.id));
    assert!(host_view.links.is_empty());
    assert_eq!(alice.factory.created_count(), 0);
}

#[tokio::test]
async fn test_invite_skips_current_members() {
    let hub = FakeSignalingHub::new();
    let (alice, bob, _meeting_id) = join_pair(&hub, "alice", "bob").await;

    hub.clear_sent();
    alice.handle.invite(vec![bob.id.clone()]).await.unwrap();
    assert!(
        !hub.sent_to(&bob.id)
            .iter()
            .any(|envelope| matches!(envelope.signal, Signal::Invite { .. })),
        "a peer already in the meeting was invited again"
    );
}

#[tokio::test]
async fn test_guest_cannot_invite() {
    let hub = FakeSignalingHub::new();
    let (_alice, bob, _meeting_id) = join_pair(&hub, "alice", "bob").await;

    let carol = TestPeer::spawn("carol", &hub).await;
    let denied = bob.handle.invite(vec![carol.id.clone()]).await;
    assert!(matches!(denied, Err(SessionError::NotHost(_))));
}

// ============================================================================
// Join by code
// ============================================================================

#[tokio::test]
async fn test_join_by_code_connects_mesh() {
    let hub = FakeSignalingHub::new();
    let alice = TestPeer::spawn("alice", &hub).await;
    let bob = TestPeer::spawn("bob", &hub).await;
    let carol = TestPeer::spawn("carol", &hub).await;
    populate_directory(&[&alice, &bob, &carol]);

    let meeting_id = alice.handle.create_meeting().await.unwrap();

    // Carol joins first; only the host is reachable in the meeting
    carol
        .handle
        .join_by_code(meeting_id.to_string())
        .await
        .unwrap();
    alice
        .wait_snapshot("carol joining the roster", |snapshot| {
            snapshot
                .participants
                .iter()
                .any(|participant| participant.peer_id == carol.id)
        })
        .await;
    wait_until("alice and carol to trade descriptions", || {
        let outbound = alice.factory.transport_for(&carol.id);
        let inbound = carol.factory.transport_for(&alice.id);
        match (outbound, inbound) {
            (Some(out), Some(inb)) => {
                !out.remote_descriptions().is_empty() && !inb.remote_descriptions().is_empty()
            }
            _ => false,
        }
    })
    .await;
    establish(&alice, &carol).await;

    // Bob joins second and must link to both existing members
    bob.handle
        .join_by_code(meeting_id.to_string())
        .await
        .unwrap();
    for (peer, other) in [(&bob, &alice), (&bob, &carol)] {
        wait_until("bob to trade descriptions with the meeting", || {
            let outbound = peer.factory.transport_for(&other.id);
            let inbound = other.factory.transport_for(&peer.id);
            match (outbound, inbound) {
                (Some(out), Some(inb)) => {
                    !out.remote_descriptions().is_empty() && !inb.remote_descriptions().is_empty()
                }
                _ => false,
            }
        })
        .await;
    }
    establish(&bob, &alice).await;
    establish(&bob, &carol).await;

    for peer in [&alice, &bob, &carol] {
        let view = peer
            .wait_snapshot("the full mesh connecting", |snapshot| {
                snapshot.links.len() == 2
                    && snapshot
                        .links
                        .iter()
                        .all(|(_, state)| *state == LinkState::Connected)
            })
            .await;
        assert_eq!(view.phase, SessionPhase::Active);
        assert_eq!(view.participants.len(), 2);
    }

    // Display names resolved via join requests and the directory
    let bob_view = bob.snapshot().await;
    let mut names: Vec<String> = bob_view
        .participants
        .iter()
        .map(|participant| participant.display_name.clone())
        .collect();
    names.sort();
    assert_eq!(names, ["Alice", "Carol"]);
}

#[tokio::test]
async fn test_join_by_code_without_reachable_peers() {
    let hub = FakeSignalingHub::new();
    let mut dave = TestPeer::spawn("dave", &hub).await;
    populate_directory(&[&dave]);

    dave.handle.join_by_code("weekly-sync").await.unwrap();

    let warned = dave
        .wait_for("the empty-meeting warning", |event| {
            matches!(event, SessionEvent::Log { .. })
        })
        .await;
    assert!(
        matches!(
            &warned,
            SessionEvent::Log { level, message, .. }
                if *level == LogLevel::Warn && message.contains("no peers")
        ),
        "unexpected event: {warned:?}"
    );

    let view = dave.snapshot().await;
    assert_eq!(view.phase, SessionPhase::Joining);
    let meeting = view.meeting.expect("the meeting should be recorded");
    assert_eq!(meeting.id.to_string(), "weekly-sync");
    assert_eq!(meeting.role, MeetingRole::Guest);
    assert_eq!(dave.factory.created_count(), 0);
}

#[tokio::test]
async fn test_blank_join_code_rejected() {
    let hub = FakeSignalingHub::new();
    let dave = TestPeer::spawn("dave", &hub).await;

    let denied = dave.handle.join_by_code("   ").await;
    assert!(matches!(denied, Err(SessionError::InvalidRequest(_))));

    let view = dave.snapshot().await;
    assert_eq!(view.phase, SessionPhase::Lobby);
    assert!(view.meeting.is_none());
}

#[tokio::test]
async fn test_single_active_meeting_enforced() {
    let hub = FakeSignalingHub::new();
    let alice = TestPeer::spawn("alice", &hub).await;

    let meeting_id = alice.handle.create_meeting().await.unwrap();
    assert!(matches!(
        alice.handle.create_meeting().await,
        Err(SessionError::AlreadyInMeeting(_))
    ));
    assert!(matches!(
        alice.handle.join_by_code("another").await,
        Err(SessionError::AlreadyInMeeting(_))
    ));

    let view = alice.snapshot().await;
    assert_eq!(view.meeting.expect("meeting should survive").id, meeting_id);
}

// ============================================================================
// Leaving and ending
// ============================================================================

#[tokio::test]
async fn test_guest_leave_keeps_meeting_running() {
    let hub = FakeSignalingHub::new();
    let (mut alice, bob, _meeting_id) = join_pair(&hub, "alice", "bob").await;
    alice.drain_events();

    bob.handle.leave().await.unwrap();

    let removed = alice
        .wait_for("the departure", |event| {
            matches!(event, SessionEvent::ParticipantRemoved { .. })
        })
        .await;
    assert!(
        matches!(
            &removed,
            SessionEvent::ParticipantRemoved { peer_id, reason }
                if *peer_id == bob.id && *reason == RemovalReason::Left
        ),
        "unexpected event: {removed:?}"
    );

    // The host stays in the now-empty meeting
    let host_view = alice.snapshot().await;
    assert!(host_view.meeting.is_some());
    assert!(host_view.participants.is_empty());
    assert!(host_view.links.is_empty());
    assert!(alice.transport_to(&bob.id).is_closed());

    let guest_view = bob.snapshot().await;
    assert_eq!(guest_view.phase, SessionPhase::Lobby);
    assert!(guest_view.meeting.is_none());
    assert!(guest_view.links.is_empty());
    assert!(bob.transport_to(&alice.id).is_closed());
    assert!(hub
        .sent_to(&alice.id)
        .iter()
        .any(|envelope| envelope.from == bob.id && envelope.signal == Signal::Leave));
}

#[tokio::test]
async fn test_host_leave_ends_meeting_everywhere() {
    let hub = FakeSignalingHub::new();
    let (alice, mut bob, meeting_id) = join_pair(&hub, "alice", "bob").await;
    bob.drain_events();

    alice.handle.leave().await.unwrap();

    let ended = bob
        .wait_for("the meeting end", |event| {
            matches!(event, SessionEvent::MeetingEnded { .. })
        })
        .await;
    assert!(
        matches!(&ended, SessionEvent::MeetingEnded { meeting_id: ended_id } if *ended_id == meeting_id),
        "unexpected event: {ended:?}"
    );

    for peer in [&alice, &bob] {
        let view = peer.snapshot().await;
        assert_eq!(view.phase, SessionPhase::Lobby);
        assert!(view.meeting.is_none());
        assert!(view.participants.is_empty());
        assert!(view.links.is_empty());
        assert!(view.chat.is_empty());
    }
    assert!(bob.transport_to(&alice.id).is_closed());

    // The host announced the end; the guest does not echo a leave back
    assert!(hub
        .sent_to(&bob.id)
        .iter()
        .any(|envelope| envelope.signal == Signal::Ended));
    assert!(!hub
        .sent()
        .iter()
        .any(|envelope| envelope.from == bob.id && envelope.signal == Signal::Leave));
}

#[tokio::test]
async fn test_leave_outside_meeting_is_noop() {
    let hub = FakeSignalingHub::new();
    let dave = TestPeer::spawn("dave", &hub).await;

    dave.handle.leave().await.unwrap();
    let view = dave.snapshot().await;
    assert_eq!(view.phase, SessionPhase::Lobby);
}

// ============================================================================
// Microphone
// ============================================================================

#[tokio::test]
async fn test_mic_toggle_mutes_without_renegotiation() {
    let hub = FakeSignalingHub::new();
    let (alice, bob, _meeting_id) = join_pair(&hub, "alice", "bob").await;
    let offers_before = alice.transport_to(&bob.id).local_descriptions().len();

    assert!(!alice.handle.toggle_mic().await.unwrap());
    let muted = alice.snapshot().await;
    assert!(!muted.mic_enabled);
    assert!(!alice.devices.last_mic().unwrap().is_enabled());

    assert!(alice.handle.toggle_mic().await.unwrap());
    assert!(alice.snapshot().await.mic_enabled);

    // Muting flips the existing track; the link is left alone
    assert_eq!(
        alice.transport_to(&bob.id).local_descriptions().len(),
        offers_before
    );
}

#[tokio::test]
async fn test_mic_acquired_mid_meeting_reaches_links() {
    let hub = FakeSignalingHub::new();
    let alice = TestPeer::spawn("alice", &hub).await;
    let mut bob = TestPeer::spawn("bob", &hub).await;
    alice.devices.set_fail_audio(true);

    alice.handle.create_meeting().await.unwrap();
    assert!(!alice.snapshot().await.mic_enabled);
    invite_join(&alice, &mut bob).await;
    let transport = alice.transport_to(&bob.id);
    assert!(transport.added_tracks().is_empty());

    // The device comes back and the toggle brings it up live
    alice.devices.set_fail_audio(false);
    assert!(alice.handle.toggle_mic().await.unwrap());
    assert!(alice.snapshot().await.mic_enabled);
    assert_eq!(transport.added_tracks().len(), 1);

    // Attaching the track renegotiates the link
    wait_until("the renegotiation offer", || {
        transport.local_descriptions().len() > 1
    })
    .await;
}

#[tokio::test]
async fn test_refused_renegotiation_does_not_block_the_toggle() {
    let hub = FakeSignalingHub::new();
    let alice = TestPeer::spawn("alice", &hub).await;
    let mut bob = TestPeer::spawn("bob", &hub).await;
    alice.devices.set_fail_audio(true);

    alice.handle.create_meeting().await.unwrap();
    invite_join(&alice, &mut bob).await;
    let transport = alice.transport_to(&bob.id);
    let offers_before = transport.local_descriptions().len();

    // The device comes back but the link refuses to renegotiate
    transport.set_fail_negotiation(true);
    alice.devices.set_fail_audio(false);
    assert!(alice.handle.toggle_mic().await.unwrap());

    // The track is attached and live; the failed offer is dropped and
    // the link stays connected as it was
    let view = alice.snapshot().await;
    assert!(view.mic_enabled);
    assert_eq!(view.pending_retries, 0);
    assert!(view
        .links
        .iter()
        .any(|(peer_id, state)| *peer_id == bob.id && *state == LinkState::Connected));
    assert_eq!(transport.added_tracks().len(), 1);
    assert_eq!(transport.local_descriptions().len(), offers_before);
}
