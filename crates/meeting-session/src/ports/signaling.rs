//! Outbound signaling port.

use async_trait::async_trait;
use signaling_protocol::SignalEnvelope;
use thiserror::Error;

/// Error type for signaling sends
#[derive(Debug, Error)]
pub enum SignalingError {
    /// The message could not be handed to the transport
    #[error("Send failed: {0}")]
    Send(String),
}

/// Trait for the outbound signaling path (enables mocking).
///
/// Delivery is best effort: the LAN signaling fabric gives no receipt,
/// so callers log failures and rely on retries or the redundant chat
/// path rather than treating them as fatal. Inbound envelopes reach
/// the session through
/// [`SessionHandle::deliver_signal`](crate::SessionHandle::deliver_signal).
#[async_trait]
pub trait SignalingPort: Send + Sync {
    /// Send one envelope toward its addressee.
    ///
    /// # Errors
    ///
    /// Returns an error if the message could not be handed off.
    async fn send(&self, envelope: SignalEnvelope) -> Result<(), SignalingError>;
}
