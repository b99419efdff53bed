//! Full-session fixtures.
//!
//! [`TestPeer`] spins up one real session loop against the fakes and
//! bundles everything a test needs to drive it: the handle, its event
//! stream, and the fake devices and transports behind it.

use crate::fake_directory::FixedDirectory;
use crate::fake_media::FakeMediaDevices;
use crate::fake_signaling::FakeSignalingHub;
use crate::fake_transport::{FakeDataChannel, FakeTransport, FakeTransportFactory};
use common::{MeetingId, PeerId};
use meeting_session::ports::directory::PeerContact;
use meeting_session::ports::rtc::{TransportEvent, TransportState};
use meeting_session::{
    LinkState, SessionConfig, SessionCoordinator, SessionEvent, SessionHandle, SessionIdentity,
    SessionSnapshot,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long event and snapshot waits poll before failing the test.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// One live session wired to the shared hub, plus its fakes.
pub struct TestPeer {
    pub id: PeerId,
    /// Display name, a capitalized form of the peer id
    pub name: String,
    pub handle: SessionHandle,
    pub events: broadcast::Receiver<SessionEvent>,
    pub factory: Arc<FakeTransportFactory>,
    pub devices: Arc<FakeMediaDevices>,
    pub directory: Arc<FixedDirectory>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

impl TestPeer {
    /// Spawn a session named `name` and attach it to the hub.
    pub async fn spawn(name: &str, hub: &FakeSignalingHub) -> Self {
        Self::spawn_with_config(name, hub, SessionConfig::default()).await
    }

    /// Spawn with an explicit config, for timer-sensitive tests.
    pub async fn spawn_with_config(
        name: &str,
        hub: &FakeSignalingHub,
        config: SessionConfig,
    ) -> Self {
        let id = PeerId::from(name);
        let display_name = capitalize(name);
        let identity = SessionIdentity {
            peer_id: id.clone(),
            display_name: display_name.clone(),
        };
        let factory = FakeTransportFactory::new();
        let devices = FakeMediaDevices::new();
        let directory = FixedDirectory::new();
        let cancel = CancellationToken::new();

        let (handle, task) = SessionCoordinator::spawn(
            identity,
            config,
            hub.port(),
            directory.clone(),
            factory.clone(),
            devices.clone(),
            cancel.clone(),
        );
        hub.attach(id.clone(), handle.clone());
        let events = handle.subscribe();

        Self {
            id,
            name: display_name,
            handle,
            events,
            factory,
            devices,
            directory,
            cancel,
            task,
        }
    }

    /// This peer as a directory contact.
    #[must_use]
    pub fn contact(&self) -> PeerContact {
        PeerContact {
            peer_id: self.id.clone(),
            display_name: self.name.clone(),
        }
    }

    /// The newest transport this session created toward `peer_id`.
    ///
    /// # Panics
    ///
    /// Panics if no transport exists toward the peer.
    #[must_use]
    pub fn transport_to(&self, peer_id: &PeerId) -> Arc<FakeTransport> {
        self.factory
            .transport_for(peer_id)
            .unwrap_or_else(|| panic!("no transport toward {peer_id}"))
    }

    /// Report this session's transport toward `peer_id` as connected.
    pub async fn connect_transport(&self, peer_id: &PeerId) {
        self.factory
            .emit(peer_id, TransportEvent::StateChanged(TransportState::Connected))
            .await;
    }

    /// Report this session's transport toward `peer_id` as lost.
    pub async fn drop_transport(&self, peer_id: &PeerId) {
        self.factory
            .emit(
                peer_id,
                TransportEvent::StateChanged(TransportState::Disconnected),
            )
            .await;
    }

    /// Receive events until one matches, failing the test after
    /// [`EVENT_TIMEOUT`].
    ///
    /// # Panics
    ///
    /// Panics on timeout or if the event stream closes.
    pub async fn wait_for(
        &mut self,
        description: &str,
        mut predicate: impl FnMut(&SessionEvent) -> bool,
    ) -> SessionEvent {
        let waited = tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                match self.events.recv().await {
                    Ok(event) => {
                        if predicate(&event) {
                            return event;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        panic!("event stream closed while waiting for {description}")
                    }
                }
            }
        })
        .await;
        waited.unwrap_or_else(|_| panic!("timed out waiting for {description}"))
    }

    /// Discard every event already queued.
    pub fn drain_events(&mut self) {
        while self.events.try_recv().is_ok() {}
    }

    /// Poll snapshots until one matches, failing the test after
    /// [`EVENT_TIMEOUT`].
    ///
    /// # Panics
    ///
    /// Panics on timeout or if the session loop is gone.
    pub async fn wait_snapshot(
        &self,
        description: &str,
        predicate: impl Fn(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let waited = tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                let snapshot = self.handle.snapshot().await.expect("session loop gone");
                if predicate(&snapshot) {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        waited.unwrap_or_else(|_| panic!("timed out waiting for {description}"))
    }

    /// Current snapshot.
    ///
    /// # Panics
    ///
    /// Panics if the session loop is gone.
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.handle.snapshot().await.expect("session loop gone")
    }

    /// Cancel the session and wait for its loop to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// Make every listed peer visible in every listed peer's directory,
/// self included, the way LAN discovery reports presence.
pub fn populate_directory(peers: &[&TestPeer]) {
    let contacts: Vec<PeerContact> = peers.iter().map(|peer| peer.contact()).collect();
    for peer in peers {
        peer.directory.set_peers(contacts.clone());
    }
}

/// Mark both ends of a negotiated pair as connected and surface a data
/// channel on whichever side answered.
pub async fn establish(a: &TestPeer, b: &TestPeer) {
    open_responder_channel(a, b).await;
    open_responder_channel(b, a).await;
    a.connect_transport(&b.id).await;
    b.connect_transport(&a.id).await;
}

/// If `peer` answered the negotiation with `other` (so it never created
/// a data channel itself), deliver the channel the initiator opened.
pub async fn open_responder_channel(peer: &TestPeer, other: &TestPeer) {
    let transport = peer.transport_to(&other.id);
    if transport.channels().is_empty() {
        let channel = FakeDataChannel::new("meeting-data");
        peer.factory
            .emit(&other.id, TransportEvent::DataChannelOpened(channel))
            .await;
    }
}

/// Poll a condition every 10ms until it holds, failing the test after
/// [`EVENT_TIMEOUT`].
///
/// # Panics
///
/// Panics on timeout.
pub async fn wait_until(description: &str, mut predicate: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(EVENT_TIMEOUT, async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if waited.is_err() {
        panic!("timed out waiting for {description}");
    }
}

/// Pull `guest` into the host's running meeting: invite, accept, wait
/// for the offer/answer exchange, then mark both directions connected.
///
/// # Panics
///
/// Panics if any step of the handshake stalls past [`EVENT_TIMEOUT`].
pub async fn invite_join(host: &TestPeer, guest: &mut TestPeer) {
    host.handle
        .invite(vec![guest.id.clone()])
        .await
        .expect("invite failed");
    let event = guest
        .wait_for("the invite", |event| {
            matches!(event, SessionEvent::InviteReceived { .. })
        })
        .await;
    let SessionEvent::InviteReceived { invite } = event else {
        unreachable!()
    };
    guest
        .handle
        .accept_invite(invite)
        .await
        .expect("accept failed");

    host.wait_snapshot("the guest joining the roster", |snapshot| {
        snapshot
            .participants
            .iter()
            .any(|participant| participant.peer_id == guest.id)
    })
    .await;
    guest
        .wait_snapshot("a link toward the host", |snapshot| {
            !snapshot.links.is_empty()
        })
        .await;

    // Let the answer land before reporting connectivity, so the link
    // settles with its remote description in place
    let host_transport = host.transport_to(&guest.id);
    wait_until("the guest's answer to apply", || {
        !host_transport.remote_descriptions().is_empty()
    })
    .await;

    establish(host, guest).await;
    host.wait_snapshot("the guest link connecting", |snapshot| {
        snapshot
            .links
            .iter()
            .any(|(peer_id, state)| *peer_id == guest.id && *state == LinkState::Connected)
    })
    .await;
    guest
        .wait_snapshot("the host link connecting", |snapshot| {
            snapshot
                .links
                .iter()
                .any(|(peer_id, state)| *peer_id == host.id && *state == LinkState::Connected)
        })
        .await;
}

/// Spawn a host and a guest and run the full invite handshake between
/// them, returning both peers connected in one meeting.
///
/// # Panics
///
/// Panics if the handshake stalls past [`EVENT_TIMEOUT`].
pub async fn join_pair(
    hub: &FakeSignalingHub,
    host_name: &str,
    guest_name: &str,
) -> (TestPeer, TestPeer, MeetingId) {
    let host = TestPeer::spawn(host_name, hub).await;
    let mut guest = TestPeer::spawn(guest_name, hub).await;
    populate_directory(&[&host, &guest]);

    let meeting_id = host
        .handle
        .create_meeting()
        .await
        .expect("create_meeting failed");
    invite_join(&host, &mut guest).await;
    (host, guest, meeting_id)
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
