//! In-process signaling hub.
//!
//! Routes [`SignalEnvelope`]s between registered sessions the way the
//! LAN signaling fabric would: fire and forget, no receipt, envelopes
//! to unknown or offline peers silently dropped. A duplicate-delivery
//! knob models the datagram fabric delivering the same envelope twice.

use async_trait::async_trait;
use common::PeerId;
use meeting_session::ports::signaling::{SignalingError, SignalingPort};
use meeting_session::SessionHandle;
use signaling_protocol::SignalEnvelope;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct HubState {
    handles: HashMap<PeerId, SessionHandle>,
    offline: HashSet<PeerId>,
    sent: Vec<SignalEnvelope>,
}

/// The hub all test sessions hang off.
#[derive(Clone, Default)]
pub struct FakeSignalingHub {
    state: Arc<Mutex<HubState>>,
    duplicate: Arc<AtomicBool>,
}

impl FakeSignalingHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The outbound signaling port to hand a session.
    #[must_use]
    pub fn port(&self) -> Arc<dyn SignalingPort> {
        Arc::new(HubPort { hub: self.clone() })
    }

    /// Register a session to receive envelopes addressed to `peer_id`.
    pub fn attach(&self, peer_id: PeerId, handle: SessionHandle) {
        self.state.lock().unwrap().handles.insert(peer_id, handle);
    }

    /// Unregister a session; envelopes to it vanish.
    pub fn detach(&self, peer_id: &PeerId) {
        self.state.lock().unwrap().handles.remove(peer_id);
    }

    /// Mark a peer unreachable without unregistering it. Envelopes to
    /// it are recorded but not delivered.
    pub fn set_offline(&self, peer_id: &PeerId, offline: bool) {
        let mut state = self.state.lock().unwrap();
        if offline {
            state.offline.insert(peer_id.clone());
        } else {
            state.offline.remove(peer_id);
        }
    }

    /// Deliver every envelope twice, like a datagram fabric that
    /// duplicated a packet.
    pub fn set_duplicate_delivery(&self, duplicate: bool) {
        self.duplicate.store(duplicate, Ordering::SeqCst);
    }

    /// Every envelope ever sent through the hub, in order.
    pub fn sent(&self) -> Vec<SignalEnvelope> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Envelopes addressed to one peer, in order.
    pub fn sent_to(&self, peer_id: &PeerId) -> Vec<SignalEnvelope> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|envelope| envelope.to == *peer_id)
            .cloned()
            .collect()
    }

    /// Forget the send log.
    pub fn clear_sent(&self) {
        self.state.lock().unwrap().sent.clear();
    }
}

struct HubPort {
    hub: FakeSignalingHub,
}

#[async_trait]
impl SignalingPort for HubPort {
    async fn send(&self, envelope: SignalEnvelope) -> Result<(), SignalingError> {
        // Take what we need and release the lock before any await
        let handle = {
            let mut state = self.hub.state.lock().unwrap();
            state.sent.push(envelope.clone());
            if state.offline.contains(&envelope.to) {
                None
            } else {
                state.handles.get(&envelope.to).cloned()
            }
        };
        let Some(handle) = handle else {
            // Unknown or offline addressee: dropped, like a datagram
            return Ok(());
        };
        let duplicate = self.hub.duplicate.load(Ordering::SeqCst);
        let _ = handle.deliver_signal(envelope.clone()).await;
        if duplicate {
            let _ = handle.deliver_signal(envelope).await;
        }
        Ok(())
    }
}
