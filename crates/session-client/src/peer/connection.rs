//! Media connection seam.
//!
//! A `MediaConnection` is one peer connection as the link manager sees it:
//! description and candidate application plus a signaling state. Each
//! connection reports asynchronous events (local candidates, remote tracks,
//! transport state) through a `ConnectionEventSender` tagged with the peer
//! id and the link generation it was created for.

use crate::errors::NegotiationError;
use crate::media::{LocalMedia, RemoteStream};
use async_trait::async_trait;
use common::protocol::{IceCandidate, SessionDescription};
use common::types::SocketId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// W3C-style signaling state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

/// Transport (ICE/DTLS) state reported by the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEventKind {
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteStream),
    StateChanged(TransportState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEvent {
    pub peer_id: SocketId,
    /// Generation of the link the connection was created for.
    pub link_id: u64,
    pub kind: ConnectionEventKind,
}

/// Event sink handed to a connection at creation.
///
/// Once detached, emits are dropped; `close` on a detached connection can
/// therefore never reach the session.
#[derive(Debug, Clone)]
pub struct ConnectionEventSender {
    peer_id: SocketId,
    link_id: u64,
    sender: mpsc::UnboundedSender<ConnectionEvent>,
    detached: Arc<AtomicBool>,
}

impl ConnectionEventSender {
    #[must_use]
    pub fn new(
        peer_id: SocketId,
        link_id: u64,
        sender: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self {
            peer_id,
            link_id,
            sender,
            detached: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn peer_id(&self) -> &SocketId {
        &self.peer_id
    }

    #[must_use]
    pub fn link_id(&self) -> u64 {
        self.link_id
    }

    /// Report an event. Returns false if detached or the session is gone.
    pub fn emit(&self, kind: ConnectionEventKind) -> bool {
        if self.is_detached() {
            return false;
        }
        self.sender
            .send(ConnectionEvent {
                peer_id: self.peer_id.clone(),
                link_id: self.link_id,
                kind,
            })
            .is_ok()
    }

    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

/// One peer connection.
#[async_trait]
pub trait MediaConnection: Send + Sync {
    async fn add_local_media(&self, media: &LocalMedia) -> Result<(), NegotiationError>;

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    /// Discard an outstanding local offer (back to `Stable`).
    async fn rollback(&self) -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    fn signaling_state(&self) -> SignalingState;

    /// Stop reporting events. Called before `close`.
    fn detach(&self);

    async fn close(&self) -> Result<(), NegotiationError>;
}

/// Creates one `MediaConnection` per peer link.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(
        &self,
        peer_id: &SocketId,
        events: ConnectionEventSender,
    ) -> Result<Box<dyn MediaConnection>, NegotiationError>;
}
