//! Scripted transport fakes.
//!
//! [`FakeTransportFactory`] hands out [`FakeTransport`] instances that
//! record every operation and never touch the network. Connection
//! progress does not happen on its own: tests drive it by emitting
//! [`TransportEvent`]s through the factory, which delivers them on the
//! event sender the session supplied at creation.

use async_trait::async_trait;
use bytes::Bytes;
use common::{PeerId, TrackId};
use meeting_session::ports::media::{LocalMediaTrack, MediaKind};
use meeting_session::ports::rtc::{
    DataChannel, IceCandidateInit, RemoteMediaTrack, RtcTransport, RtcTransportFactory,
    SessionDescription, TransportError, TransportEvent, TransportEventSender,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// A data channel that records sends instead of transmitting.
///
/// Channels start open so chat reaches the channel path by default;
/// use [`set_open`](Self::set_open) to model a channel that has not
/// come up.
#[derive(Debug)]
pub struct FakeDataChannel {
    label: String,
    open: AtomicBool,
    sent: Mutex<Vec<Bytes>>,
}

impl FakeDataChannel {
    #[must_use]
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Every payload sent on this channel, in order.
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataChannel for FakeDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::DataChannel("channel not open".to_string()));
        }
        self.sent.lock().unwrap().push(data);
        Ok(())
    }
}

/// A remote track stub for injecting `TrackAdded` events.
#[derive(Debug)]
pub struct FakeRemoteTrack {
    id: TrackId,
    kind: MediaKind,
}

impl FakeRemoteTrack {
    #[must_use]
    pub fn new(id: &str, kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: TrackId::from(id),
            kind,
        })
    }
}

impl RemoteMediaTrack for FakeRemoteTrack {
    fn id(&self) -> TrackId {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }
}

#[derive(Default)]
struct TransportRecord {
    local_descriptions: Vec<SessionDescription>,
    remote_descriptions: Vec<SessionDescription>,
    applied_candidates: Vec<IceCandidateInit>,
    added_tracks: Vec<TrackId>,
    removed_bindings: Vec<TrackId>,
    channels: Vec<Arc<FakeDataChannel>>,
}

/// A transport that records operations and produces synthetic SDP.
pub struct FakeTransport {
    peer_id: PeerId,
    record: Mutex<TransportRecord>,
    fail_negotiation: AtomicBool,
    closed: AtomicBool,
    sdp_seq: AtomicU32,
}

impl FakeTransport {
    fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            record: Mutex::new(TransportRecord::default()),
            fail_negotiation: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sdp_seq: AtomicU32::new(0),
        }
    }

    /// Make `create_offer` and `create_answer` fail until reset.
    pub fn set_fail_negotiation(&self, fail: bool) {
        self.fail_negotiation.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn local_descriptions(&self) -> Vec<SessionDescription> {
        self.record.lock().unwrap().local_descriptions.clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.record.lock().unwrap().remote_descriptions.clone()
    }

    /// Candidates applied so far, in application order.
    pub fn applied_candidates(&self) -> Vec<IceCandidateInit> {
        self.record.lock().unwrap().applied_candidates.clone()
    }

    /// Ids of local tracks attached to this transport.
    pub fn added_tracks(&self) -> Vec<TrackId> {
        self.record.lock().unwrap().added_tracks.clone()
    }

    /// Bindings removed from this transport.
    pub fn removed_bindings(&self) -> Vec<TrackId> {
        self.record.lock().unwrap().removed_bindings.clone()
    }

    /// Data channels created by the session on this transport.
    pub fn channels(&self) -> Vec<Arc<FakeDataChannel>> {
        self.record.lock().unwrap().channels.clone()
    }

    /// The most recently created data channel, if any.
    pub fn last_channel(&self) -> Option<Arc<FakeDataChannel>> {
        self.record.lock().unwrap().channels.last().cloned()
    }

    fn next_sdp(&self, kind: &str) -> String {
        let seq = self.sdp_seq.fetch_add(1, Ordering::SeqCst);
        format!("v=0 {kind}-{peer}-{seq}", peer = self.peer_id)
    }
}

#[async_trait]
impl RtcTransport for FakeTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        if self.fail_negotiation.load(Ordering::SeqCst) {
            return Err(TransportError::Negotiation("scripted failure".to_string()));
        }
        Ok(SessionDescription::offer(self.next_sdp("offer")))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        if self.fail_negotiation.load(Ordering::SeqCst) {
            return Err(TransportError::Negotiation("scripted failure".to_string()));
        }
        Ok(SessionDescription::answer(self.next_sdp("answer")))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.record.lock().unwrap().local_descriptions.push(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.record.lock().unwrap().remote_descriptions.push(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.record.lock().unwrap().applied_candidates.push(candidate);
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, TransportError> {
        let channel = FakeDataChannel::new(label);
        self.record.lock().unwrap().channels.push(Arc::clone(&channel));
        Ok(channel)
    }

    async fn add_track(&self, track: Arc<dyn LocalMediaTrack>) -> Result<TrackId, TransportError> {
        let binding = track.id();
        self.record.lock().unwrap().added_tracks.push(binding.clone());
        Ok(binding)
    }

    async fn remove_track(&self, binding: &TrackId) -> Result<(), TransportError> {
        self.record
            .lock()
            .unwrap()
            .removed_bindings
            .push(binding.clone());
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FactoryState {
    /// Transports per peer, oldest first
    transports: HashMap<PeerId, Vec<Arc<FakeTransport>>>,
    /// Event sender the session supplied for each peer's transport
    senders: HashMap<PeerId, TransportEventSender>,
    created: usize,
}

/// Factory handing out [`FakeTransport`]s and remembering the event
/// sender for each, so tests can push transport events into the
/// session.
#[derive(Default)]
pub struct FakeTransportFactory {
    state: Mutex<FactoryState>,
    fail_create: AtomicBool,
}

impl FakeTransportFactory {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `create` fail until reset.
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// The newest transport created toward a peer.
    pub fn transport_for(&self, peer_id: &PeerId) -> Option<Arc<FakeTransport>> {
        self.state
            .lock()
            .unwrap()
            .transports
            .get(peer_id)
            .and_then(|list| list.last().cloned())
    }

    /// Every transport ever created toward a peer, oldest first.
    pub fn transports_for(&self, peer_id: &PeerId) -> Vec<Arc<FakeTransport>> {
        self.state
            .lock()
            .unwrap()
            .transports
            .get(peer_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of transports created.
    pub fn created_count(&self) -> usize {
        self.state.lock().unwrap().created
    }

    /// Deliver a transport event into the owning session, as if the
    /// transport toward `peer_id` produced it.
    ///
    /// # Panics
    ///
    /// Panics if no transport was ever created toward the peer.
    pub async fn emit(&self, peer_id: &PeerId, event: TransportEvent) {
        let sender = self
            .state
            .lock()
            .unwrap()
            .senders
            .get(peer_id)
            .cloned()
            .unwrap_or_else(|| panic!("no transport toward {peer_id}"));
        sender
            .send((peer_id.clone(), event))
            .await
            .expect("session loop gone");
    }
}

#[async_trait]
impl RtcTransportFactory for FakeTransportFactory {
    async fn create(
        &self,
        peer_id: &PeerId,
        events: TransportEventSender,
    ) -> Result<Arc<dyn RtcTransport>, TransportError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransportError::Setup("scripted failure".to_string()));
        }
        let transport = Arc::new(FakeTransport::new(peer_id.clone()));
        let mut state = self.state.lock().unwrap();
        state
            .transports
            .entry(peer_id.clone())
            .or_default()
            .push(Arc::clone(&transport));
        state.senders.insert(peer_id.clone(), events);
        state.created += 1;
        Ok(transport)
    }
}
