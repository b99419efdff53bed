//! Ports to the session's external collaborators.
//!
//! The session core owns meeting semantics; capture devices, peer
//! transports, the signaling fabric, and peer discovery plug in
//! through these traits. Production adapters live in their own
//! crates; tests substitute fakes.

pub mod directory;
pub mod media;
pub mod rtc;
pub mod signaling;

pub use directory::{PeerContact, PeerDirectory};
pub use media::{LocalMediaTrack, MediaDevices, MediaError, MediaKind, ScreenCapture};
pub use rtc::{
    DataChannel, IceCandidateInit, RemoteMediaTrack, RtcTransport, RtcTransportFactory, SdpKind,
    SessionDescription, TransportError, TransportEvent, TransportEventSender, TransportState,
};
pub use signaling::{SignalingError, SignalingPort};
