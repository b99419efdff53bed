//! # Session Test Utilities
//!
//! Shared test utilities for the Parley meeting session engine.
//!
//! This crate provides fake implementations of every session port and
//! fixtures for wiring several in-process sessions together, so whole
//! meetings run in a test without any network, device, or WebRTC
//! stack.
//!
//! ## Modules
//!
//! - `fake_signaling` - In-process signaling hub routing envelopes
//!   between registered sessions
//! - `fake_transport` - Scripted transport and factory with manual
//!   event driving
//! - `fake_media` - Capture devices handing out inert tracks
//! - `fake_directory` - Fixed LAN presence directory
//! - `fixtures` - `TestPeer` and helpers for spinning up full sessions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use session_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let hub = FakeSignalingHub::new();
//!     let mut alice = TestPeer::spawn("alice", &hub).await;
//!     let mut bob = TestPeer::spawn("bob", &hub).await;
//!
//!     let meeting_id = alice.handle.create_meeting().await.unwrap();
//!     alice.handle.invite(vec![bob.id.clone()]).await.unwrap();
//!
//!     // Drive bob's side of the handshake...
//! }
//! ```

pub mod fake_directory;
pub mod fake_media;
pub mod fake_signaling;
pub mod fake_transport;
pub mod fixtures;

// Re-export commonly used items
pub use fake_directory::*;
pub use fake_media::*;
pub use fake_signaling::*;
pub use fake_transport::*;
pub use fixtures::*;
