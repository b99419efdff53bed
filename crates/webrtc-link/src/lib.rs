//! # WebRTC Link
//!
//! Production transport adapter for the meeting session engine. Binds
//! the `RtcTransport`/`RtcTransportFactory` ports onto the `webrtc`
//! crate's native ICE/DTLS/SCTP stack. This is the only crate where
//! `webrtc` types appear; everything above it talks to the ports.
//!
//! ## Modules
//!
//! - `config` - ICE server configuration
//! - `factory` - [`WebRtcLinkFactory`], one peer connection per call
//! - `transport` - [`WebRtcTransport`], the per-peer connection
//! - `channel` - data channel wrapper
//! - `track` - remote track handles and RTP drain

#![warn(clippy::pedantic)]

pub mod channel;
pub mod config;
pub mod factory;
pub mod track;
pub mod transport;

pub use config::WebRtcLinkConfig;
pub use factory::WebRtcLinkFactory;
pub use transport::WebRtcTransport;
