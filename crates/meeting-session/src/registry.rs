//! Registry of live peer links.

use crate::link::{LinkState, PeerLink};
use common::PeerId;
use std::collections::HashMap;

/// All peer links of the active meeting, keyed by peer id.
#[derive(Default)]
pub struct ConnectionRegistry {
    links: HashMap<PeerId, PeerLink>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            links: HashMap::new(),
        }
    }

    /// Insert a link, returning the one it replaced, if any.
    pub fn insert(&mut self, link: PeerLink) -> Option<PeerLink> {
        self.links.insert(link.peer_id().clone(), link)
    }

    #[must_use]
    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerLink> {
        self.links.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &PeerId) -> Option<&mut PeerLink> {
        self.links.get_mut(peer_id)
    }

    pub fn remove(&mut self, peer_id: &PeerId) -> Option<PeerLink> {
        self.links.remove(peer_id)
    }

    #[must_use]
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.links.contains_key(peer_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Peers with a link, in no particular order
    #[must_use]
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.links.keys().cloned().collect()
    }

    /// Snapshot of the link state per peer
    #[must_use]
    pub fn states(&self) -> Vec<(PeerId, LinkState)> {
        self.links
            .iter()
            .map(|(peer_id, link)| (peer_id.clone(), link.state()))
            .collect()
    }

    /// Remove and return every link.
    pub fn drain(&mut self) -> Vec<PeerLink> {
        self.links.drain().map(|(_, link)| link).collect()
    }
}
