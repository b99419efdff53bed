//! Serverless meeting sessions over direct peer links.
//!
//! Every endpoint runs one [`SessionCoordinator`]: a single task that
//! owns the roster, one transport per peer, chat history, local media,
//! and the reconnect timers. The [`SessionHandle`] is the application
//! facing surface; [`SessionEvent`]s stream out to whatever UI is
//! attached.
//!
//! Platform concerns stay behind the [`ports`] traits: signaling
//! delivery, peer discovery, WebRTC transports, and capture devices
//! are all injected, so the whole engine runs against in-process fakes
//! in tests.

#![warn(clippy::pedantic)]

pub mod actors;
pub mod chat;
pub mod config;
pub mod errors;
pub mod events;
pub mod ice_queue;
pub mod link;
pub mod media;
pub mod ports;
pub mod reconnect;
pub mod registry;
pub mod roster;

pub use actors::coordinator::{SessionCoordinator, SessionHandle, SessionIdentity};
pub use actors::messages::{Meeting, MeetingRole, SessionPhase, SessionSnapshot};
pub use config::SessionConfig;
pub use errors::SessionError;
pub use events::{IncomingInvite, LogLevel, RemovalReason, SessionEvent};
pub use link::LinkState;
pub use roster::Participant;
