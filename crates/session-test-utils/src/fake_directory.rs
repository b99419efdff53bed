//! Fixed LAN presence directory.

use async_trait::async_trait;
use common::PeerId;
use meeting_session::ports::directory::{PeerContact, PeerDirectory};
use std::sync::{Arc, Mutex};

/// A presence directory reporting a configured list of peers.
#[derive(Default)]
pub struct FixedDirectory {
    peers: Mutex<Vec<PeerContact>>,
}

impl FixedDirectory {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace the online peer list.
    pub fn set_peers(&self, peers: Vec<PeerContact>) {
        *self.peers.lock().unwrap() = peers;
    }

    /// Add one online peer.
    pub fn add_peer(&self, peer_id: PeerId, display_name: &str) {
        self.peers.lock().unwrap().push(PeerContact {
            peer_id,
            display_name: display_name.to_string(),
        });
    }

    /// Remove a peer from the online list.
    pub fn remove_peer(&self, peer_id: &PeerId) {
        self.peers
            .lock()
            .unwrap()
            .retain(|contact| contact.peer_id != *peer_id);
    }
}

#[async_trait]
impl PeerDirectory for FixedDirectory {
    async fn online_peers(&self) -> Vec<PeerContact> {
        self.peers.lock().unwrap().clone()
    }
}
