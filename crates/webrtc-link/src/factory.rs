//! Transport factory.

use crate::config::WebRtcLinkConfig;
use crate::transport::WebRtcTransport;
use async_trait::async_trait;
use common::PeerId;
use meeting_session::ports::rtc::{
    RtcTransport, RtcTransportFactory, TransportError, TransportEventSender,
};
use std::sync::Arc;

/// [`RtcTransportFactory`] implementation producing one
/// [`WebRtcTransport`] per peer.
pub struct WebRtcLinkFactory {
    config: WebRtcLinkConfig,
}

impl WebRtcLinkFactory {
    #[must_use]
    pub fn new(config: WebRtcLinkConfig) -> Self {
        Self { config }
    }

    /// Build a connection toward `peer`, returning the concrete
    /// transport. Embedders that feed capture frames use this to reach
    /// [`WebRtcTransport::sample_track`].
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying stack cannot build a
    /// connection.
    pub async fn connect(
        &self,
        peer: &PeerId,
        events: TransportEventSender,
    ) -> Result<Arc<WebRtcTransport>, TransportError> {
        WebRtcTransport::connect(peer.clone(), &self.config, events).await
    }
}

#[async_trait]
impl RtcTransportFactory for WebRtcLinkFactory {
    async fn create(
        &self,
        peer: &PeerId,
        events: TransportEventSender,
    ) -> Result<Arc<dyn RtcTransport>, TransportError> {
        let transport = self.connect(peer, events).await?;
        Ok(transport)
    }
}
