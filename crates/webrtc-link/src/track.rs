//! Remote track handles.

use common::{PeerId, TrackId};
use meeting_session::ports::media::MediaKind;
use meeting_session::ports::rtc::{RemoteMediaTrack, TransportEvent, TransportEventSender};
use std::sync::Arc;
use tracing::debug;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

/// [`RemoteMediaTrack`] handle for a track a peer attached.
pub struct RemoteTrack {
    id: TrackId,
    kind: MediaKind,
}

impl RemoteTrack {
    pub(crate) fn new(id: TrackId, kind: MediaKind) -> Arc<Self> {
        Arc::new(Self { id, kind })
    }
}

impl RemoteMediaTrack for RemoteTrack {
    fn id(&self) -> TrackId {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }
}

/// Map the codec type of an incoming track onto the media kinds the
/// session understands.
pub(crate) fn media_kind(codec_type: RTPCodecType) -> Option<MediaKind> {
    match codec_type {
        RTPCodecType::Audio => Some(MediaKind::Audio),
        RTPCodecType::Video => Some(MediaKind::Video),
        RTPCodecType::Unspecified => None,
    }
}

/// Consume RTP from a remote track until it ends, then report the
/// removal. Keeping the reader running is also what lets the stack
/// deliver the media; playback taps hook in at the platform layer.
pub(crate) fn spawn_rtp_drain(
    peer_id: PeerId,
    events: TransportEventSender,
    track: Arc<TrackRemote>,
    track_id: TrackId,
    kind: MediaKind,
) {
    tokio::spawn(async move {
        while track.read_rtp().await.is_ok() {}
        debug!(
            target: "webrtc.link",
            peer_id = %peer_id,
            track_id = %track_id,
            kind = kind.as_str(),
            "Remote track ended"
        );
        let _ = events
            .send((peer_id, TransportEvent::TrackRemoved { track_id, kind }))
            .await;
    });
}
