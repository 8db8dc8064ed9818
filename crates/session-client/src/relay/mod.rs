//! Relay transport.
//!
//! - [`listeners`] - scoped relay-event subscriptions
//! - [`ws`] - tokio-tungstenite WebSocket transport
//!
//! A transport sends `ClientMessage`s and dispatches every inbound
//! `ServerMessage` to the listeners registered on its `ListenerRegistry`.

pub mod listeners;
pub mod ws;

pub use listeners::{EventKind, ListenerRegistry, Subscription, SubscriptionGroup};
pub use ws::WsRelay;

use crate::errors::ClientError;
use async_trait::async_trait;
use common::protocol::{ClientMessage, ServerMessage};

/// What a listener receives.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Message(ServerMessage),
    /// The transport stopped; no further messages will arrive.
    Closed,
}

#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn send(&self, message: ClientMessage) -> Result<(), ClientError>;

    fn listeners(&self) -> &ListenerRegistry;
}
