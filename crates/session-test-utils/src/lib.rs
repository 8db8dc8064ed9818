//! # Session Test Utilities
//!
//! Shared test utilities for the Study Room session client.
//!
//! Mocks stand in for the collaborators a session is built from, so the
//! client core can be driven without a relay or a media stack.
//!
//! ## Modules
//!
//! - `mock_connection` - scripted peer connections with W3C-style signaling states
//! - `mock_relay` - in-memory relay transport that records sends and delivers events
//! - `mock_media` - capture sources that fail or count acquisitions
//! - `fixtures` - participants, rooms and join acks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use session_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let room = TestRoom::new("room-1").with_host(participant("host", "Ada", 1));
//!     let relay = MockRelay::builder()
//!         .join_reply(room.joined("me", vec![room.host.clone()]))
//!         .build();
//!     let factory = MockConnectionFactory::new();
//!
//!     let deps = test_deps(relay.clone(), factory.clone());
//!     // Session::join(deps, Identity::new("Bob"), "room-1".into()).await ...
//! }
//! ```

pub mod fixtures;
pub mod mock_connection;
pub mod mock_media;
pub mod mock_relay;

pub use fixtures::*;
pub use mock_connection::*;
pub use mock_media::*;
pub use mock_relay::*;

use session_client::media::{LocalMedia, StaticMediaSource};
use session_client::{ClientConfig, SessionDeps};
use std::sync::Arc;

/// Relay URL used by test configurations. Never dialled.
pub const TEST_RELAY_URL: &str = "ws://relay.test/ws";

/// Session dependencies wired to the given mocks, with camera and
/// microphone available.
#[must_use]
pub fn test_deps(relay: Arc<MockRelay>, connections: MockConnectionFactory) -> SessionDeps {
    test_deps_with_config(ClientConfig::new(TEST_RELAY_URL), relay, connections)
}

/// Like [`test_deps`] with a custom configuration.
#[must_use]
pub fn test_deps_with_config(
    config: ClientConfig,
    relay: Arc<MockRelay>,
    connections: MockConnectionFactory,
) -> SessionDeps {
    SessionDeps {
        config,
        relay,
        media: Arc::new(StaticMediaSource::new(LocalMedia::camera_and_microphone())),
        connections: Arc::new(connections),
    }
}
