//! Meeting signaling protocol for Parley.
//!
//! This crate defines the JSON messages peers exchange to negotiate
//! and run a meeting: invitations, SDP offers/answers, trickled ICE
//! candidates, chat, screen-share announcements, and membership
//! updates. Every envelope is addressed (`from`/`to`) and scoped to a
//! meeting so receivers can discard strays without touching session
//! state. The same crate also defines the small frame format carried
//! over per-peer data channels.

#![warn(clippy::pedantic)]

pub mod chat;
pub mod codec;
pub mod envelope;

pub use chat::{ChannelFrame, ChatMessage};
pub use codec::{decode_envelope, decode_frame, encode_envelope, encode_frame, SignalCodecError};
pub use envelope::{Signal, SignalEnvelope};
