//! Chat delivery and deduplication.
//!
//! - Messages ride the data channel and signaling at the same time
//! - Receivers keep exactly one copy however many paths deliver it
//! - A closed channel leaves the signaling copy to carry the message
//! - Junk on the channel is discarded without disturbing history

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bytes::Bytes;
use common::PeerId;
use meeting_session::ports::rtc::TransportEvent;
use meeting_session::{SessionError, SessionEvent};
use session_test_utils::{join_pair, FakeSignalingHub, TestPeer};
use signaling_protocol::{encode_frame, ChannelFrame, ChatMessage, Signal};

fn frame_bytes(message: &ChatMessage) -> Bytes {
    Bytes::from(
        encode_frame(&ChannelFrame::Chat {
            chat: message.clone(),
        })
        .unwrap(),
    )
}

fn chat_from(sender: &PeerId, name: &str, text: &str, timestamp: i64) -> ChatMessage {
    ChatMessage {
        sender: sender.clone(),
        sender_name: name.to_string(),
        text: text.to_string(),
        timestamp,
    }
}

async fn wait_for_chat(peer: &mut TestPeer, text: &str) -> ChatMessage {
    let wanted = text.to_string();
    let event = peer
        .wait_for("a chat message", move |event| {
            matches!(event, SessionEvent::ChatReceived { message } if message.text == wanted)
        })
        .await;
    let SessionEvent::ChatReceived { message } = event else {
        unreachable!()
    };
    message
}

// ============================================================================
// Fan-out
// ============================================================================

#[tokio::test]
async fn test_chat_rides_channel_and_signaling() {
    let hub = FakeSignalingHub::new();
    let (alice, mut bob, _meeting_id) = join_pair(&hub, "alice", "bob").await;
    bob.drain_events();

    alice.handle.send_chat("hello from alice").await.unwrap();

    // The sender sees its own message immediately
    let ours = alice.snapshot().await;
    assert_eq!(ours.chat.len(), 1);
    assert_eq!(ours.chat.first().unwrap().text, "hello from alice");

    let message = wait_for_chat(&mut bob, "hello from alice").await;
    assert_eq!(message.sender, alice.id);
    assert_eq!(message.sender_name, "Alice");

    // Both paths carried a copy
    let channel = alice.transport_to(&bob.id).last_channel().unwrap();
    assert_eq!(channel.sent().len(), 1);
    assert!(hub
        .sent_to(&bob.id)
        .iter()
        .any(|sent| matches!(sent.signal, Signal::Chat { .. })));

    let theirs = bob.snapshot().await;
    assert_eq!(theirs.chat.len(), 1);
}

#[tokio::test]
async fn test_blank_chat_is_not_sent() {
    let hub = FakeSignalingHub::new();
    let (alice, bob, _meeting_id) = join_pair(&hub, "alice", "bob").await;
    hub.clear_sent();

    alice.handle.send_chat("   ").await.unwrap();

    let view = alice.snapshot().await;
    assert!(view.chat.is_empty());
    assert!(!hub
        .sent_to(&bob.id)
        .iter()
        .any(|sent| matches!(sent.signal, Signal::Chat { .. })));
    let channel = alice.transport_to(&bob.id).last_channel().unwrap();
    assert!(channel.sent().is_empty());
}

#[tokio::test]
async fn test_chat_outside_meeting_is_rejected() {
    let hub = FakeSignalingHub::new();
    let alice = TestPeer::spawn("alice", &hub).await;

    let result = alice.handle.send_chat("anyone here?").await;
    assert!(matches!(result, Err(SessionError::NoActiveMeeting)));
}

// ============================================================================
// Deduplication
// ============================================================================

#[tokio::test]
async fn test_channel_replay_of_a_delivered_message_is_dropped() {
    let hub = FakeSignalingHub::new();
    let (alice, mut bob, _meeting_id) = join_pair(&hub, "alice", "bob").await;
    bob.drain_events();

    alice.handle.send_chat("hello").await.unwrap();
    let message = wait_for_chat(&mut bob, "hello").await;

    // The signaling copy landed first; now feed the channel copy in
    let copy = alice
        .transport_to(&bob.id)
        .last_channel()
        .unwrap()
        .sent()
        .first()
        .unwrap()
        .clone();
    bob.factory
        .emit(&alice.id, TransportEvent::DataChannelMessage(copy))
        .await;

    // A follow-up frame proves the replay was processed before it
    let marker = chat_from(&alice.id, "Alice", "marker", message.timestamp + 1);
    bob.factory
        .emit(
            &alice.id,
            TransportEvent::DataChannelMessage(frame_bytes(&marker)),
        )
        .await;
    wait_for_chat(&mut bob, "marker").await;

    let view = bob.snapshot().await;
    assert_eq!(view.chat.len(), 2);
}

#[tokio::test]
async fn test_duplicate_signaling_delivery_keeps_one_copy() {
    let hub = FakeSignalingHub::new();
    let (alice, mut bob, _meeting_id) = join_pair(&hub, "alice", "bob").await;
    hub.set_duplicate_delivery(true);
    bob.drain_events();

    alice.handle.send_chat("once").await.unwrap();
    wait_for_chat(&mut bob, "once").await;

    // Both deliveries rode the signal mailbox, so this fences them
    let view = bob.snapshot().await;
    assert_eq!(view.chat.len(), 1);
    while let Ok(event) = bob.events.try_recv() {
        assert!(
            !matches!(event, SessionEvent::ChatReceived { .. }),
            "the duplicate delivery surfaced a second time"
        );
    }
}

// ============================================================================
// Degraded paths
// ============================================================================

#[tokio::test]
async fn test_channel_carries_chat_when_signaling_is_down() {
    let hub = FakeSignalingHub::new();
    let (alice, mut bob, _meeting_id) = join_pair(&hub, "alice", "bob").await;
    hub.set_offline(&bob.id, true);
    bob.drain_events();

    alice.handle.send_chat("are you there?").await.unwrap();

    // Signaling dropped it; replay the channel copy by hand
    let copy = alice
        .transport_to(&bob.id)
        .last_channel()
        .unwrap()
        .sent()
        .first()
        .unwrap()
        .clone();
    bob.factory
        .emit(&alice.id, TransportEvent::DataChannelMessage(copy))
        .await;

    let message = wait_for_chat(&mut bob, "are you there?").await;
    assert_eq!(message.sender_name, "Alice");
    let view = bob.snapshot().await;
    assert_eq!(view.chat.len(), 1);
}

#[tokio::test]
async fn test_closed_channel_falls_back_to_signaling() {
    let hub = FakeSignalingHub::new();
    let (alice, mut bob, _meeting_id) = join_pair(&hub, "alice", "bob").await;
    let channel = alice.transport_to(&bob.id).last_channel().unwrap();
    channel.set_open(false);
    bob.drain_events();

    alice.handle.send_chat("fallback").await.unwrap();

    assert!(channel.sent().is_empty());
    let message = wait_for_chat(&mut bob, "fallback").await;
    assert_eq!(message.text, "fallback");
}

#[tokio::test]
async fn test_malformed_channel_frame_is_ignored() {
    let hub = FakeSignalingHub::new();
    let (alice, mut bob, _meeting_id) = join_pair(&hub, "alice", "bob").await;
    bob.drain_events();

    bob.factory
        .emit(
            &alice.id,
            TransportEvent::DataChannelMessage(Bytes::from_static(b"{ not a frame")),
        )
        .await;
    let marker = chat_from(&alice.id, "Alice", "still here", 7);
    bob.factory
        .emit(
            &alice.id,
            TransportEvent::DataChannelMessage(frame_bytes(&marker)),
        )
        .await;
    wait_for_chat(&mut bob, "still here").await;

    let view = bob.snapshot().await;
    assert_eq!(view.chat.len(), 1);
    assert_eq!(view.chat.first().unwrap().text, "still here");
}
