//! Per-peer connection link.
//!
//! A `PeerLink` owns one transport toward one peer: its negotiation
//! state, data channel, attached local track bindings, received remote
//! tracks, and the pending ICE queue. Links are owned by the
//! [`ConnectionRegistry`](crate::registry::ConnectionRegistry) and
//! only ever touched from the session loop, so none of this needs
//! interior locking.

use crate::ice_queue::IceQueue;
use crate::ports::media::{LocalMediaTrack, MediaKind};
use crate::ports::rtc::{
    DataChannel, IceCandidateInit, RemoteMediaTrack, RtcTransport, SessionDescription,
    TransportError, TransportState,
};
use common::{PeerId, TrackId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Negotiation state of a peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Created, no negotiation yet
    New,
    /// We sent an offer and await the answer
    OfferSent,
    /// A remote offer arrived and we are answering
    OfferReceived,
    /// Descriptions are exchanged, transport still connecting
    Answered,
    /// Transport reports a working connection
    Connected,
    /// Transport lost the connection; reconnect may revive it
    Disconnected,
    /// Transport gave up; reconnect may replace it
    Failed,
    /// Torn down
    Closed,
}

impl LinkState {
    /// Short name for logging
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::New => "new",
            LinkState::OfferSent => "offer_sent",
            LinkState::OfferReceived => "offer_received",
            LinkState::Answered => "answered",
            LinkState::Connected => "connected",
            LinkState::Disconnected => "disconnected",
            LinkState::Failed => "failed",
            LinkState::Closed => "closed",
        }
    }
}

/// One peer connection and everything hanging off it.
pub struct PeerLink {
    peer_id: PeerId,
    initiator: bool,
    state: LinkState,
    transport: Arc<dyn RtcTransport>,
    /// Last state the transport itself reported
    transport_state: TransportState,
    data_channel: Option<Arc<dyn DataChannel>>,
    remote_tracks: HashMap<MediaKind, Arc<dyn RemoteMediaTrack>>,
    ice_queue: IceQueue,
    audio_binding: Option<TrackId>,
    video_binding: Option<TrackId>,
}

impl PeerLink {
    /// Create a link around a freshly built transport.
    #[must_use]
    pub fn new(peer_id: PeerId, initiator: bool, transport: Arc<dyn RtcTransport>) -> Self {
        Self {
            peer_id,
            initiator,
            state: LinkState::New,
            transport,
            transport_state: TransportState::New,
            data_channel: None,
            remote_tracks: HashMap::new(),
            ice_queue: IceQueue::new(),
            audio_binding: None,
            video_binding: None,
        }
    }

    /// Peer this link belongs to
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Current negotiation state
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Whether we ran the initiator path for the current negotiation
    #[must_use]
    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    /// Clone of the underlying transport handle
    #[must_use]
    pub fn transport(&self) -> Arc<dyn RtcTransport> {
        Arc::clone(&self.transport)
    }

    /// Transition the link state. Returns true if it changed.
    pub fn set_state(&mut self, state: LinkState) -> bool {
        if self.state == state {
            return false;
        }
        debug!(
            target: "session.link",
            peer_id = %self.peer_id,
            from = self.state.as_str(),
            to = state.as_str(),
            "Link state changed"
        );
        self.state = state;
        true
    }

    /// Record the transport-reported connection state.
    pub fn note_transport_state(&mut self, state: TransportState) {
        self.transport_state = state;
    }

    /// Whether the transport currently reports a working connection
    #[must_use]
    pub fn transport_connected(&self) -> bool {
        self.transport_state == TransportState::Connected
    }

    /// Negotiation state to settle into once descriptions are exchanged.
    fn settled_state(&self) -> LinkState {
        if self.transport_connected() {
            LinkState::Connected
        } else {
            LinkState::Answered
        }
    }

    /// Run the initiator half of a negotiation: create an offer, apply
    /// it locally, and return the SDP to signal to the peer.
    ///
    /// Also used to renegotiate an established link after a track
    /// change; the link drops back to `OfferSent` until the answer
    /// arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects any step.
    pub async fn start_offer(&mut self) -> Result<String, TransportError> {
        let offer = self.transport.create_offer().await?;
        let sdp = offer.sdp.clone();
        self.transport.set_local_description(offer).await?;
        self.initiator = true;
        self.set_state(LinkState::OfferSent);
        Ok(sdp)
    }

    /// Run the responder half: apply the remote offer, release any
    /// queued candidates, and return the answer SDP to signal back.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects any step.
    pub async fn apply_remote_offer(&mut self, sdp: String) -> Result<String, TransportError> {
        if self.state != LinkState::Connected {
            self.set_state(LinkState::OfferReceived);
        }
        self.transport
            .set_remote_description(SessionDescription::offer(sdp))
            .await?;
        self.flush_candidates().await;

        let answer = self.transport.create_answer().await?;
        let answer_sdp = answer.sdp.clone();
        self.transport.set_local_description(answer).await?;
        let settled = self.settled_state();
        self.set_state(settled);
        Ok(answer_sdp)
    }

    /// Apply the peer's answer to our outstanding offer and release
    /// any queued candidates.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the description.
    pub async fn apply_remote_answer(&mut self, sdp: String) -> Result<(), TransportError> {
        self.transport
            .set_remote_description(SessionDescription::answer(sdp))
            .await?;
        self.flush_candidates().await;
        let settled = self.settled_state();
        self.set_state(settled);
        Ok(())
    }

    /// Handle a trickled remote candidate: queue it until the remote
    /// description lands, apply it directly afterwards.
    pub async fn handle_remote_candidate(&mut self, candidate: IceCandidateInit) {
        if self.ice_queue.is_flushed() {
            if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                warn!(
                    target: "session.link",
                    peer_id = %self.peer_id,
                    error = %e,
                    "Failed to apply remote candidate"
                );
            }
        } else {
            self.ice_queue.push(candidate);
        }
    }

    /// Apply every queued candidate in arrival order, exactly once.
    async fn flush_candidates(&mut self) {
        let pending = self.ice_queue.drain();
        if pending.is_empty() {
            return;
        }
        debug!(
            target: "session.link",
            peer_id = %self.peer_id,
            count = pending.len(),
            "Flushing queued ICE candidates"
        );
        for candidate in pending {
            // A single bad candidate must not block the rest
            if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                warn!(
                    target: "session.link",
                    peer_id = %self.peer_id,
                    error = %e,
                    "Failed to apply queued candidate"
                );
            }
        }
    }

    /// Attach the microphone track. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the track.
    pub async fn attach_audio(
        &mut self,
        track: Arc<dyn LocalMediaTrack>,
    ) -> Result<(), TransportError> {
        if self.audio_binding.is_some() {
            return Ok(());
        }
        let binding = self.transport.add_track(track).await?;
        self.audio_binding = Some(binding);
        Ok(())
    }

    /// Attach the screen video track. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the track.
    pub async fn attach_video(
        &mut self,
        track: Arc<dyn LocalMediaTrack>,
    ) -> Result<(), TransportError> {
        if self.video_binding.is_some() {
            return Ok(());
        }
        let binding = self.transport.add_track(track).await?;
        self.video_binding = Some(binding);
        Ok(())
    }

    /// Detach the screen video track, if attached. Returns whether a
    /// binding was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the removal.
    pub async fn detach_video(&mut self) -> Result<bool, TransportError> {
        match self.video_binding.take() {
            Some(binding) => {
                self.transport.remove_track(&binding).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Store the open data channel for this link.
    pub fn set_data_channel(&mut self, channel: Arc<dyn DataChannel>) {
        self.data_channel = Some(channel);
    }

    /// The link's data channel, if one is up
    #[must_use]
    pub fn data_channel(&self) -> Option<&Arc<dyn DataChannel>> {
        self.data_channel.as_ref()
    }

    /// Record a remote track; returns the kind it replaced or added.
    pub fn add_remote_track(&mut self, track: Arc<dyn RemoteMediaTrack>) -> MediaKind {
        let kind = track.kind();
        self.remote_tracks.insert(kind, track);
        kind
    }

    /// Drop a remote track by id, returning its kind.
    pub fn remove_remote_track_by_id(&mut self, track_id: &TrackId) -> Option<MediaKind> {
        let kind = self
            .remote_tracks
            .iter()
            .find(|(_, track)| &track.id() == track_id)
            .map(|(kind, _)| *kind)?;
        self.remote_tracks.remove(&kind);
        Some(kind)
    }

    /// Whether the peer currently sends us video
    #[must_use]
    pub fn has_remote_video(&self) -> bool {
        self.remote_tracks.contains_key(&MediaKind::Video)
    }

    /// Kinds of remote media currently received on this link
    #[must_use]
    pub fn remote_track_kinds(&self) -> Vec<MediaKind> {
        self.remote_tracks.keys().copied().collect()
    }

    /// Close the transport and drop everything attached to it.
    pub async fn close(&mut self) {
        self.transport.close().await;
        self.data_channel = None;
        self.remote_tracks.clear();
        self.audio_binding = None;
        self.video_binding = None;
        self.set_state(LinkState::Closed);
    }
}

// Tests for this module use the `session-test-utils` fakes, which
// depend on this crate; they live in `tests/link_tests.rs` so they
// link the same crate instance as the fakes.
