//! Common utilities and types shared across Parley components.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;

/// Module for wall-clock time helpers
pub mod time;

pub use types::{MeetingId, PeerId, TrackId};
