//! Data channel wrapper.

use async_trait::async_trait;
use bytes::Bytes;
use common::PeerId;
use meeting_session::ports::rtc::{
    DataChannel, TransportError, TransportEvent, TransportEventSender,
};
use std::sync::Arc;
use tracing::debug;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

/// [`DataChannel`] implementation over an `RTCDataChannel`.
pub struct ChannelHandle {
    inner: Arc<RTCDataChannel>,
}

impl ChannelHandle {
    pub(crate) fn new(inner: Arc<RTCDataChannel>) -> Arc<Self> {
        Arc::new(Self { inner })
    }

    /// Register open and message callbacks that forward into the
    /// session's event funnel.
    ///
    /// Applies to locally created channels and peer-announced ones
    /// alike; the session learns a channel is usable through the
    /// `DataChannelOpened` event either way.
    pub(crate) fn wire(
        peer_id: &PeerId,
        events: &TransportEventSender,
        channel: &Arc<RTCDataChannel>,
    ) {
        let open_events = events.clone();
        let open_peer = peer_id.clone();
        let open_channel = Arc::clone(channel);
        channel.on_open(Box::new(move || {
            let events = open_events.clone();
            let peer_id = open_peer.clone();
            let channel = Arc::clone(&open_channel);
            Box::pin(async move {
                debug!(
                    target: "webrtc.link",
                    peer_id = %peer_id,
                    label = %channel.label(),
                    "Data channel open"
                );
                let handle = ChannelHandle::new(channel);
                let _ = events
                    .send((peer_id, TransportEvent::DataChannelOpened(handle)))
                    .await;
            })
        }));

        let message_events = events.clone();
        let message_peer = peer_id.clone();
        channel.on_message(Box::new(move |message: DataChannelMessage| {
            let events = message_events.clone();
            let peer_id = message_peer.clone();
            Box::pin(async move {
                let _ = events
                    .send((peer_id, TransportEvent::DataChannelMessage(message.data)))
                    .await;
            })
        }));
    }
}

#[async_trait]
impl DataChannel for ChannelHandle {
    fn label(&self) -> String {
        self.inner.label().to_string()
    }

    fn is_open(&self) -> bool {
        self.inner.ready_state() == RTCDataChannelState::Open
    }

    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        self.inner
            .send(&data)
            .await
            .map(|_| ())
            .map_err(|error| TransportError::DataChannel(error.to_string()))
    }
}
