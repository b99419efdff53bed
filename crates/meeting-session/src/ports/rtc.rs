//! Peer transport port.
//!
//! The session core drives peer connections exclusively through these
//! traits; the concrete ICE/DTLS/SCTP stack binds at the edge. A
//! transport reports everything asynchronous (state changes, local
//! candidates, inbound channels, remote tracks) through the event
//! sender supplied at creation, tagged with the owning peer id, so the
//! session can funnel all of it into one serialized loop.

use super::media::{LocalMediaTrack, MediaKind};
use async_trait::async_trait;
use bytes::Bytes;
use common::{PeerId, TrackId};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection construction failed
    #[error("Connection setup failed: {0}")]
    Setup(String),

    /// Offer/answer exchange failed
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// An ICE candidate could not be applied
    #[error("ICE candidate rejected: {0}")]
    IceCandidate(String),

    /// Data channel operation failed
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// Media track operation failed
    #[error("Track error: {0}")]
    Track(String),

    /// The transport has been closed
    #[error("Transport closed")]
    Closed,
}

/// Which side of the offer/answer exchange a description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description in SDP form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// Offer or answer
    pub kind: SdpKind,
    /// Raw SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer description
    #[must_use]
    pub fn offer(sdp: String) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp,
        }
    }

    /// Build an answer description
    #[must_use]
    pub fn answer(sdp: String) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp,
        }
    }
}

/// A trickled ICE candidate as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidateInit {
    /// Candidate line
    pub candidate: String,
    /// Media stream identification tag, when present
    pub sdp_mid: Option<String>,
    /// Media line index, when present
    pub sdp_mline_index: Option<u32>,
}

/// Connection-level state reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Handle to a remote peer's media track.
pub trait RemoteMediaTrack: Send + Sync {
    /// Stable identifier for this track
    fn id(&self) -> TrackId;

    /// Kind of media the track carries
    fn kind(&self) -> MediaKind;
}

/// Handle to a data channel (enables mocking).
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Channel label
    fn label(&self) -> String;

    /// Whether the channel is open for sending
    fn is_open(&self) -> bool;

    /// Send a payload over the channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed or the send fails.
    async fn send(&self, data: Bytes) -> Result<(), TransportError>;
}

/// Event emitted by a transport.
pub enum TransportEvent {
    /// Connection state changed
    StateChanged(TransportState),
    /// A local ICE candidate is ready to trickle to the peer
    LocalCandidate(IceCandidateInit),
    /// A data channel is open (locally created or peer-announced)
    DataChannelOpened(Arc<dyn DataChannel>),
    /// A payload arrived on the data channel
    DataChannelMessage(Bytes),
    /// The peer attached a media track
    TrackAdded(Arc<dyn RemoteMediaTrack>),
    /// A previously attached remote track went away
    TrackRemoved {
        /// Identifier of the removed track
        track_id: TrackId,
        /// Kind of the removed track
        kind: MediaKind,
    },
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::StateChanged(state) => {
                f.debug_tuple("StateChanged").field(state).finish()
            }
            TransportEvent::LocalCandidate(candidate) => {
                f.debug_tuple("LocalCandidate").field(candidate).finish()
            }
            TransportEvent::DataChannelOpened(channel) => f
                .debug_struct("DataChannelOpened")
                .field("label", &channel.label())
                .finish(),
            TransportEvent::DataChannelMessage(data) => f
                .debug_struct("DataChannelMessage")
                .field("len", &data.len())
                .finish(),
            TransportEvent::TrackAdded(track) => f
                .debug_struct("TrackAdded")
                .field("track_id", &track.id())
                .field("kind", &track.kind())
                .finish(),
            TransportEvent::TrackRemoved { track_id, kind } => f
                .debug_struct("TrackRemoved")
                .field("track_id", track_id)
                .field("kind", kind)
                .finish(),
        }
    }
}

/// Sender half of the per-session transport event funnel.
pub type TransportEventSender = mpsc::Sender<(PeerId, TransportEvent)>;

/// Trait for a single peer connection (enables mocking).
#[async_trait]
pub trait RtcTransport: Send + Sync {
    /// Create an SDP offer.
    ///
    /// # Errors
    ///
    /// Returns an error if the offer cannot be generated.
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    /// Create an SDP answer to a previously applied remote offer.
    ///
    /// # Errors
    ///
    /// Returns an error if the answer cannot be generated.
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    /// Apply a local description.
    ///
    /// # Errors
    ///
    /// Returns an error if the description is rejected.
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    /// Apply a remote description.
    ///
    /// # Errors
    ///
    /// Returns an error if the description is rejected.
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    /// Apply a remote ICE candidate.
    ///
    /// Callers must only invoke this after a remote description has
    /// been applied; earlier candidates belong in the pending queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the candidate is rejected.
    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), TransportError>;

    /// Open a data channel with the given label.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel cannot be created.
    async fn create_data_channel(&self, label: &str)
        -> Result<Arc<dyn DataChannel>, TransportError>;

    /// Attach a local track; returns a binding id for later removal.
    ///
    /// # Errors
    ///
    /// Returns an error if the track cannot be attached.
    async fn add_track(&self, track: Arc<dyn LocalMediaTrack>) -> Result<TrackId, TransportError>;

    /// Detach a previously attached local track by binding id.
    ///
    /// # Errors
    ///
    /// Returns an error if the binding is unknown or removal fails.
    async fn remove_track(&self, binding: &TrackId) -> Result<(), TransportError>;

    /// Close the connection and release its resources.
    async fn close(&self);
}

/// Trait for creating peer transports (enables mocking).
#[async_trait]
pub trait RtcTransportFactory: Send + Sync {
    /// Create a transport for the given peer.
    ///
    /// All asynchronous activity on the transport is reported through
    /// `events`, tagged with `peer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying stack cannot build a
    /// connection.
    async fn create(
        &self,
        peer: &PeerId,
        events: TransportEventSender,
    ) -> Result<Arc<dyn RtcTransport>, TransportError>;
}
