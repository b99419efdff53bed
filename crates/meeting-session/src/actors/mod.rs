//! The session loop actor and its message surface.

pub mod coordinator;
pub mod messages;
