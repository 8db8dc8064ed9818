//! Client-facing WebSocket gateway.
//!
//! - [`ws`] - axum WebSocket endpoint: frame codec and socket reader/writer
//! - [`dispatch`] - per-socket session routing decoded client events to actors
//!
//! The dispatch layer is transport-agnostic so room behaviour can be
//! exercised without a network.

pub mod dispatch;
pub mod ws;

pub use dispatch::ClientSession;
pub use ws::gateway_router;
