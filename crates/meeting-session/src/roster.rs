//! Meeting roster.
//!
//! The roster is the authoritative participant record; peer links,
//! grants, and timers all hang off membership here. Display names
//! follow a first-authoritative-source policy: a name carried by an
//! invite response or rejoin request locks the entry, later signals
//! only fill placeholders.

use common::PeerId;
use std::collections::HashMap;

/// A meeting participant as exposed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Peer identifier
    pub peer_id: PeerId,
    /// Best known display name (the peer id until a name is learned)
    pub display_name: String,
}

#[derive(Debug)]
struct Entry {
    display_name: String,
    /// Set once a name from an authoritative source is stored
    named: bool,
}

/// Participant roster for one meeting.
#[derive(Debug, Default)]
pub struct Roster {
    entries: HashMap<PeerId, Entry>,
}

impl Roster {
    /// Create an empty roster
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer. Returns true if the peer was not present before.
    ///
    /// `display_name: None` stores the peer id as a placeholder name;
    /// `Some` stores the name and locks it. Adding an existing peer
    /// never downgrades its name, though a `Some` name may upgrade a
    /// placeholder.
    pub fn add(&mut self, peer_id: PeerId, display_name: Option<String>) -> bool {
        if self.entries.contains_key(&peer_id) {
            if let Some(name) = display_name {
                self.set_name(&peer_id, &name);
            }
            return false;
        }

        let entry = match display_name {
            Some(name) if !name.is_empty() => Entry {
                display_name: name,
                named: true,
            },
            _ => Entry {
                display_name: peer_id.as_str().to_string(),
                named: false,
            },
        };
        self.entries.insert(peer_id, entry);
        true
    }

    /// Upgrade a placeholder name. Returns true if the name changed.
    pub fn set_name(&mut self, peer_id: &PeerId, display_name: &str) -> bool {
        match self.entries.get_mut(peer_id) {
            Some(entry) if !entry.named && !display_name.is_empty() => {
                entry.display_name = display_name.to_string();
                entry.named = true;
                true
            }
            _ => false,
        }
    }

    /// Remove a peer, returning its participant record if present.
    pub fn remove(&mut self, peer_id: &PeerId) -> Option<Participant> {
        self.entries.remove(peer_id).map(|entry| Participant {
            peer_id: peer_id.clone(),
            display_name: entry.display_name,
        })
    }

    /// Whether the peer is in the roster
    #[must_use]
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.entries.contains_key(peer_id)
    }

    /// Best known display name for a peer
    #[must_use]
    pub fn display_name(&self, peer_id: &PeerId) -> Option<&str> {
        self.entries.get(peer_id).map(|e| e.display_name.as_str())
    }

    /// All participant peer ids
    #[must_use]
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.entries.keys().cloned().collect()
    }

    /// All participants, sorted by peer id for stable output
    #[must_use]
    pub fn participants(&self) -> Vec<Participant> {
        let mut list: Vec<Participant> = self
            .entries
            .iter()
            .map(|(peer_id, entry)| Participant {
                peer_id: peer_id.clone(),
                display_name: entry.display_name.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        list
    }

    /// Number of participants
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the roster is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every participant
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
