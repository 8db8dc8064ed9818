//! Peer mesh.
//!
//! - [`connection`] - `MediaConnection` / `ConnectionFactory` seam and event tagging
//! - [`link`] - per-peer link state machine
//! - [`manager`] - arena of links keyed by peer id; applies remote signaling
//! - `webrtc_backend` - seam implementation on the `webrtc` crate (feature `webrtc-backend`)

pub mod connection;
pub mod link;
pub mod manager;
#[cfg(feature = "webrtc-backend")]
pub mod webrtc_backend;

pub use connection::{
    ConnectionEvent, ConnectionEventKind, ConnectionEventSender, ConnectionFactory,
    MediaConnection, SignalingState, TransportState,
};
pub use link::{LinkState, PeerLinkView};
pub use manager::{LinkEvent, PeerLinkManager};
