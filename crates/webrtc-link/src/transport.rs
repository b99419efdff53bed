//! Per-peer WebRTC connection.
//!
//! One [`WebRtcTransport`] wraps one `RTCPeerConnection`. Construction
//! wires the connection's callbacks into the session's transport event
//! funnel; after that the session drives negotiation through the
//! [`RtcTransport`] port and everything asynchronous flows back as
//! tagged events.

use crate::channel::ChannelHandle;
use crate::config::WebRtcLinkConfig;
use crate::track::{media_kind, spawn_rtp_drain, RemoteTrack};
use async_trait::async_trait;
use common::{PeerId, TrackId};
use meeting_session::ports::media::{LocalMediaTrack, MediaKind};
use meeting_session::ports::rtc::{
    DataChannel, IceCandidateInit, RtcTransport, SdpKind, SessionDescription, TransportError,
    TransportEvent, TransportEventSender, TransportState,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// A local track attached to the connection.
///
/// The RTP sender is what `remove_track` needs later; the sample track
/// is the handle capture pipelines write frames through.
struct TrackBinding {
    sender: Arc<RTCRtpSender>,
    sample: Arc<TrackLocalStaticSample>,
}

/// [`RtcTransport`] implementation over an `RTCPeerConnection`.
pub struct WebRtcTransport {
    peer_id: PeerId,
    connection: Arc<RTCPeerConnection>,
    events: TransportEventSender,
    bindings: Mutex<HashMap<TrackId, TrackBinding>>,
}

impl WebRtcTransport {
    /// Build a connection toward `peer_id` and wire its callbacks.
    pub(crate) async fn connect(
        peer_id: PeerId,
        config: &WebRtcLinkConfig,
        events: TransportEventSender,
    ) -> Result<Arc<Self>, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|error| TransportError::Setup(error.to_string()))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|error| TransportError::Setup(error.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(config),
            ..RTCConfiguration::default()
        };
        let connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|error| TransportError::Setup(error.to_string()))?,
        );

        let transport = Arc::new(Self {
            peer_id,
            connection,
            events,
            bindings: Mutex::new(HashMap::new()),
        });
        transport.wire_callbacks();
        info!(
            target: "webrtc.link",
            peer_id = %transport.peer_id,
            "Peer connection created"
        );
        Ok(transport)
    }

    /// The sample track behind a binding, for capture pipelines to
    /// write frames into. `None` once the binding is removed.
    pub async fn sample_track(&self, binding: &TrackId) -> Option<Arc<TrackLocalStaticSample>> {
        self.bindings
            .lock()
            .await
            .get(binding)
            .map(|bound| Arc::clone(&bound.sample))
    }

    fn wire_callbacks(&self) {
        let state_events = self.events.clone();
        let state_peer = self.peer_id.clone();
        self.connection
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let events = state_events.clone();
                let peer_id = state_peer.clone();
                Box::pin(async move {
                    if let Some(mapped) = map_connection_state(state) {
                        debug!(
                            target: "webrtc.link",
                            peer_id = %peer_id,
                            state = ?mapped,
                            "Connection state changed"
                        );
                        let _ = events
                            .send((peer_id, TransportEvent::StateChanged(mapped)))
                            .await;
                    }
                })
            }));

        let ice_events = self.events.clone();
        let ice_peer = self.peer_id.clone();
        self.connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = ice_events.clone();
                let peer_id = ice_peer.clone();
                Box::pin(async move {
                    // None marks end of gathering; nothing to trickle
                    let Some(candidate) = candidate else { return };
                    let init = match candidate.to_json() {
                        Ok(init) => init,
                        Err(error) => {
                            warn!(
                                target: "webrtc.link",
                                peer_id = %peer_id,
                                %error,
                                "Could not serialize local candidate"
                            );
                            return;
                        }
                    };
                    let _ = events
                        .send((
                            peer_id,
                            TransportEvent::LocalCandidate(candidate_from_rtc(init)),
                        ))
                        .await;
                })
            }));

        let channel_events = self.events.clone();
        let channel_peer = self.peer_id.clone();
        self.connection
            .on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                let events = channel_events.clone();
                let peer_id = channel_peer.clone();
                Box::pin(async move {
                    debug!(
                        target: "webrtc.link",
                        peer_id = %peer_id,
                        label = %channel.label(),
                        "Peer announced a data channel"
                    );
                    ChannelHandle::wire(&peer_id, &events, &channel);
                })
            }));

        let track_events = self.events.clone();
        let track_peer = self.peer_id.clone();
        self.connection
            .on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                let events = track_events.clone();
                let peer_id = track_peer.clone();
                Box::pin(async move {
                    let Some(kind) = media_kind(track.kind()) else {
                        warn!(
                            target: "webrtc.link",
                            peer_id = %peer_id,
                            "Ignoring remote track of unspecified kind"
                        );
                        return;
                    };
                    let track_id = TrackId(track.id());
                    info!(
                        target: "webrtc.link",
                        peer_id = %peer_id,
                        track_id = %track_id,
                        kind = kind.as_str(),
                        "Remote track attached"
                    );
                    let handle = RemoteTrack::new(track_id.clone(), kind);
                    let _ = events
                        .send((peer_id.clone(), TransportEvent::TrackAdded(handle)))
                        .await;
                    spawn_rtp_drain(peer_id, events, track, track_id, kind);
                })
            }));
    }
}

#[async_trait]
impl RtcTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self
            .connection
            .create_offer(None)
            .await
            .map_err(|error| TransportError::Negotiation(error.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self
            .connection
            .create_answer(None)
            .await
            .map_err(|error| TransportError::Negotiation(error.to_string()))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.connection
            .set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(|error| TransportError::Negotiation(error.to_string()))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.connection
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(|error| TransportError::Negotiation(error.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), TransportError> {
        self.connection
            .add_ice_candidate(candidate_to_rtc(candidate))
            .await
            .map_err(|error| TransportError::IceCandidate(error.to_string()))
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, TransportError> {
        let channel = self
            .connection
            .create_data_channel(label, None)
            .await
            .map_err(|error| TransportError::DataChannel(error.to_string()))?;
        ChannelHandle::wire(&self.peer_id, &self.events, &channel);
        Ok(ChannelHandle::new(channel))
    }

    async fn add_track(&self, track: Arc<dyn LocalMediaTrack>) -> Result<TrackId, TransportError> {
        let binding = track.id();
        let kind = track.kind();
        let sample = Arc::new(TrackLocalStaticSample::new(
            codec_capability(kind),
            binding.to_string(),
            stream_id(kind).to_string(),
        ));
        let sender = self
            .connection
            .add_track(Arc::clone(&sample) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|error| TransportError::Track(error.to_string()))?;
        self.bindings
            .lock()
            .await
            .insert(binding.clone(), TrackBinding { sender, sample });
        debug!(
            target: "webrtc.link",
            peer_id = %self.peer_id,
            binding = %binding,
            kind = kind.as_str(),
            "Local track attached"
        );
        Ok(binding)
    }

    async fn remove_track(&self, binding: &TrackId) -> Result<(), TransportError> {
        let removed = self.bindings.lock().await.remove(binding);
        let Some(bound) = removed else {
            return Err(TransportError::Track(format!(
                "unknown track binding {binding}"
            )));
        };
        self.connection
            .remove_track(&bound.sender)
            .await
            .map_err(|error| TransportError::Track(error.to_string()))?;
        debug!(
            target: "webrtc.link",
            peer_id = %self.peer_id,
            binding = %binding,
            "Local track detached"
        );
        Ok(())
    }

    async fn close(&self) {
        if let Err(error) = self.connection.close().await {
            debug!(
                target: "webrtc.link",
                peer_id = %self.peer_id,
                %error,
                "Close reported an error"
            );
        }
    }
}

fn ice_servers(config: &WebRtcLinkConfig) -> Vec<RTCIceServer> {
    if config.ice_servers.is_empty() {
        return Vec::new();
    }
    vec![RTCIceServer {
        urls: config.ice_servers.clone(),
        ..RTCIceServer::default()
    }]
}

fn map_connection_state(state: RTCPeerConnectionState) -> Option<TransportState> {
    match state {
        RTCPeerConnectionState::New => Some(TransportState::New),
        RTCPeerConnectionState::Connecting => Some(TransportState::Connecting),
        RTCPeerConnectionState::Connected => Some(TransportState::Connected),
        RTCPeerConnectionState::Disconnected => Some(TransportState::Disconnected),
        RTCPeerConnectionState::Failed => Some(TransportState::Failed),
        RTCPeerConnectionState::Closed => Some(TransportState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let converted = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    converted.map_err(|error| TransportError::Negotiation(error.to_string()))
}

fn candidate_from_rtc(init: RTCIceCandidateInit) -> IceCandidateInit {
    IceCandidateInit {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index.map(u32::from),
    }
}

fn candidate_to_rtc(candidate: IceCandidateInit) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate
            .sdp_mline_index
            .and_then(|index| u16::try_from(index).ok()),
        username_fragment: None,
    }
}

fn codec_capability(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: 48000,
            channels: 2,
            ..RTCRtpCodecCapability::default()
        },
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_string(),
            clock_rate: 90000,
            ..RTCRtpCodecCapability::default()
        },
    }
}

fn stream_id(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Audio => "parley-mic",
        MediaKind::Video => "parley-screen",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_states_map_to_transport_states() {
        assert_eq!(
            map_connection_state(RTCPeerConnectionState::Connected),
            Some(TransportState::Connected)
        );
        assert_eq!(
            map_connection_state(RTCPeerConnectionState::Disconnected),
            Some(TransportState::Disconnected)
        );
        assert_eq!(
            map_connection_state(RTCPeerConnectionState::Failed),
            Some(TransportState::Failed)
        );
        assert_eq!(map_connection_state(RTCPeerConnectionState::Unspecified), None);
    }

    #[test]
    fn test_candidate_round_trips_through_rtc_form() {
        let candidate = IceCandidateInit {
            candidate: "candidate:1 1 UDP 2122252543 192.168.1.7 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };

        let back = candidate_from_rtc(candidate_to_rtc(candidate.clone()));
        assert_eq!(back, candidate);
    }

    #[test]
    fn test_oversized_mline_index_dropped_on_conversion() {
        let candidate = IceCandidateInit {
            candidate: "candidate:1 1 UDP 2122252543 192.168.1.7 50000 typ host".to_string(),
            sdp_mid: None,
            sdp_mline_index: Some(u32::from(u16::MAX) + 1),
        };

        let rtc = candidate_to_rtc(candidate);
        assert_eq!(rtc.sdp_mline_index, None);
    }

    #[test]
    fn test_codec_capabilities_per_kind() {
        let audio = codec_capability(MediaKind::Audio);
        assert_eq!(audio.mime_type, MIME_TYPE_OPUS);
        assert_eq!(audio.clock_rate, 48000);

        let video = codec_capability(MediaKind::Video);
        assert_eq!(video.mime_type, MIME_TYPE_VP8);
        assert_eq!(video.clock_rate, 90000);
    }

    #[test]
    fn test_no_ice_servers_for_lan_default() {
        let config = WebRtcLinkConfig::default();
        assert!(ice_servers(&config).is_empty());

        let config = WebRtcLinkConfig {
            ice_servers: vec!["stun:stun.example.org:3478".to_string()],
        };
        assert_eq!(ice_servers(&config).len(), 1);
    }
}
