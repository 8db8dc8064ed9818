//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.

use super::connection::ConnectionActorHandle;
use super::room::RoomActorHandle;
use crate::errors::RelayError;
use common::protocol::{
    IceCandidate, ParticipantInfo, RoomSummary, ServerMessage, SessionDescription,
};
use common::types::{RoomId, SocketId, Visibility};
use tokio::sync::oneshot;

/// Parameters of a room creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRoomRequest {
    pub title: String,
    pub category: String,
    pub visibility: Visibility,
    /// `None` selects the configured default.
    pub max_participants: Option<usize>,
    pub question_list_id: String,
}

/// Messages sent to `RoomRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Register a new room and spawn its actor.
    CreateRoom {
        request: CreateRoomRequest,
        respond_to: oneshot::Sender<Result<RoomId, RelayError>>,
    },

    /// Look up a room actor by ID.
    GetRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomActorHandle, RelayError>>,
    },

    /// Summaries of public rooms.
    ListRooms {
        respond_to: oneshot::Sender<Vec<RoomSummary>>,
    },

    /// Registry status (for health checks and tests).
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Stop accepting rooms and cancel every room actor.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), RelayError>>,
    },
}

/// Registry status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatus {
    pub room_count: usize,
    pub connection_count: usize,
    pub participant_count: usize,
    pub is_draining: bool,
}

/// Host-only study session toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressAction {
    Start,
    Stop,
}

/// Host-only index intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexIntent {
    Next,
    Prev,
    Move(i64),
    Current,
}

/// Unicast signaling payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
}

impl SignalPayload {
    /// Metric label for this payload.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Offer(_) => "offer",
            SignalPayload::Answer(_) => "answer",
            SignalPayload::Candidate(_) => "candidate",
        }
    }
}

/// Why a participant is leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// Client sent `leave`.
    Explicit,
    /// Socket closed.
    Disconnected,
}

impl LeaveReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LeaveReason::Explicit => "explicit",
            LeaveReason::Disconnected => "disconnected",
        }
    }
}

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// A socket wants to join. On success the room itself enqueues the
    /// `joined` ack on `connection` before announcing the newcomer.
    Join {
        socket_id: SocketId,
        nickname: String,
        connection: ConnectionActorHandle,
        respond_to: oneshot::Sender<Result<(), RelayError>>,
    },

    /// A participant left or its socket closed.
    Leave {
        socket_id: SocketId,
        reason: LeaveReason,
    },

    /// Relay an offer/answer/candidate to one member.
    Signal {
        sender_id: SocketId,
        target_id: SocketId,
        payload: SignalPayload,
    },

    /// Broadcast a reaction to every member.
    Reaction {
        socket_id: SocketId,
        reaction_type: String,
    },

    /// Host start/stop.
    Progress {
        socket_id: SocketId,
        action: ProgressAction,
    },

    /// Host index change.
    Index {
        socket_id: SocketId,
        intent: IndexIntent,
    },

    /// Host ends the room for everyone.
    Finish { socket_id: SocketId },

    /// Snapshot of room state.
    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

/// Room state snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomState {
    pub room_id: RoomId,
    pub title: String,
    pub category: String,
    pub visibility: Visibility,
    pub max_participants: usize,
    pub created_at: i64,
    pub in_progress: bool,
    pub current_index: usize,
    pub question_count: usize,
    /// Members ordered by join order.
    pub participants: Vec<ParticipantInfo>,
    /// `None` until the first join.
    pub host: Option<SocketId>,
}

impl RoomState {
    #[must_use]
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.room_id.clone(),
            title: self.title.clone(),
            category: self.category.clone(),
            participant_count: self.participants.len(),
            max_participants: self.max_participants,
            in_progress: self.in_progress,
            created_at: self.created_at,
        }
    }
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Deliver a frame to the client.
    Send { message: ServerMessage },

    /// Close the connection.
    Close { reason: String },
}

/// Metadata handed to a room actor when it is spawned.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub room_id: RoomId,
    pub title: String,
    pub category: String,
    pub visibility: Visibility,
    pub max_participants: usize,
    pub question_list_id: String,
    pub questions: Vec<String>,
    pub bar_joins_in_progress: bool,
    pub pending_ttl: std::time::Duration,
}
