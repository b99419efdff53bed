//! Reconnect scheduling for lost peer links.
//!
//! One timer per peer, a fixed delay between attempts, and a hard
//! attempt budget. Timers run as detached tasks that post back into
//! the session loop, so all decisions stay on the loop itself.

use crate::actors::messages::InternalEvent;
use common::PeerId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Outcome of requesting a reconnect attempt for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Attempt number n will fire after the configured delay
    Scheduled(u32),
    /// A timer for this peer is already running
    AlreadyPending,
    /// The attempt budget for this peer is spent
    Exhausted,
}

/// Schedules reconnect attempts toward the session loop.
pub struct ReconnectSupervisor {
    delay: Duration,
    max_attempts: u32,
    signals: mpsc::Sender<InternalEvent>,
    pending: HashMap<PeerId, JoinHandle<()>>,
    attempts: HashMap<PeerId, u32>,
}

impl ReconnectSupervisor {
    #[must_use]
    pub fn new(delay: Duration, max_attempts: u32, signals: mpsc::Sender<InternalEvent>) -> Self {
        Self {
            delay,
            max_attempts,
            signals,
            pending: HashMap::new(),
            attempts: HashMap::new(),
        }
    }

    /// Request a reconnect attempt for a peer. At most one timer per
    /// peer runs at a time, no matter how many loss events arrive.
    pub fn schedule(&mut self, peer_id: &PeerId) -> ScheduleOutcome {
        if self.pending.contains_key(peer_id) {
            return ScheduleOutcome::AlreadyPending;
        }
        let attempt = self.attempts.get(peer_id).copied().unwrap_or(0) + 1;
        if attempt > self.max_attempts {
            return ScheduleOutcome::Exhausted;
        }
        self.attempts.insert(peer_id.clone(), attempt);

        let signals = self.signals.clone();
        let peer = peer_id.clone();
        let delay = self.delay;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Send failure means the session loop is gone
            let _ = signals.send(InternalEvent::RetryDue { peer_id: peer }).await;
        });
        self.pending.insert(peer_id.clone(), timer);
        ScheduleOutcome::Scheduled(attempt)
    }

    /// Note that the pending timer for a peer delivered.
    pub fn on_fired(&mut self, peer_id: &PeerId) {
        self.pending.remove(peer_id);
    }

    /// Abort any pending timer and forget the attempt counter.
    ///
    /// Called when the peer connects or leaves; the next loss starts
    /// from attempt one again.
    pub fn cancel(&mut self, peer_id: &PeerId) {
        if let Some(timer) = self.pending.remove(peer_id) {
            timer.abort();
            debug!(target: "session.reconnect", peer_id = %peer_id, "Reconnect timer cancelled");
        }
        self.attempts.remove(peer_id);
    }

    /// Abort every pending timer and reset all counters.
    pub fn cancel_all(&mut self) {
        for (_, timer) in self.pending.drain() {
            timer.abort();
        }
        self.attempts.clear();
    }

    /// Number of peers with a timer currently running
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn supervisor(
        max_attempts: u32,
    ) -> (ReconnectSupervisor, mpsc::Receiver<InternalEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (
            ReconnectSupervisor::new(Duration::from_secs(3), max_attempts, tx),
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (mut reconnect, mut rx) = supervisor(5);
        let peer = PeerId::from("bob");

        assert_eq!(reconnect.schedule(&peer), ScheduleOutcome::Scheduled(1));
        assert_eq!(reconnect.pending_count(), 1);

        tokio::time::advance(Duration::from_secs(3)).await;
        let event = rx.recv().await.unwrap();
        assert!(
            matches!(&event, InternalEvent::RetryDue { peer_id } if *peer_id == peer),
            "unexpected event: {event:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_timer_per_peer() {
        let (mut reconnect, _rx) = supervisor(5);
        let peer = PeerId::from("bob");

        assert_eq!(reconnect.schedule(&peer), ScheduleOutcome::Scheduled(1));
        // A second loss event while the timer runs does not stack
        assert_eq!(reconnect.schedule(&peer), ScheduleOutcome::AlreadyPending);
        assert_eq!(reconnect.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_budget_exhausts() {
        let (mut reconnect, mut rx) = supervisor(2);
        let peer = PeerId::from("bob");

        for attempt in 1..=2 {
            assert_eq!(
                reconnect.schedule(&peer),
                ScheduleOutcome::Scheduled(attempt)
            );
            tokio::time::advance(Duration::from_secs(3)).await;
            let _ = rx.recv().await.unwrap();
            reconnect.on_fired(&peer);
        }
        assert_eq!(reconnect.schedule(&peer), ScheduleOutcome::Exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_resets_budget() {
        let (mut reconnect, mut rx) = supervisor(1);
        let peer = PeerId::from("bob");

        assert_eq!(reconnect.schedule(&peer), ScheduleOutcome::Scheduled(1));
        reconnect.cancel(&peer);
        assert_eq!(reconnect.pending_count(), 0);

        // Cancelled timer never delivers
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());

        // Budget starts over after a cancel
        assert_eq!(reconnect.schedule(&peer), ScheduleOutcome::Scheduled(1));
    }
}
