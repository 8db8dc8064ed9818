//! Actor model implementation for the relay.
//!
//! ```text
//! RoomRegistryActor (singleton per relay instance)
//! ├── supervises N RoomActors
//! │   └── RoomActor (one per registered room)
//! │       └── owns roster, host, progress and question list
//! └── parents N ConnectionActors
//!     └── ConnectionActor (one per WebSocket)
//! ```
//!
//! Connection actors are children of the registry rather than of a room
//! because a socket exists before it joins (it may create or list rooms
//! first). Rooms hold connection handles for their members.
//!
//! # Key Design Decisions
//!
//! - **One room per socket**: a second join on the same socket is a conflict
//! - **CancellationToken propagation**: parents pass child tokens for graceful shutdown
//! - **Mailbox monitoring**: depth thresholds (Room: 100/500, Connection: 50/200)
//! - **Message passing**: all inter-actor communication via `tokio::sync::mpsc` channels

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;

// Re-export primary types
pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use registry::{RoomRegistryActor, RoomRegistryHandle};
pub use room::{RoomActor, RoomActorHandle};
