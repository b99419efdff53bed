//! LAN presence directory port.

use async_trait::async_trait;
use common::PeerId;

/// An online peer as reported by the discovery layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerContact {
    /// Peer identifier
    pub peer_id: PeerId,
    /// Display name advertised by the peer
    pub display_name: String,
}

/// Trait for the LAN presence directory (enables mocking).
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// Peers currently known to be online, self possibly included.
    async fn online_peers(&self) -> Vec<PeerContact>;
}
