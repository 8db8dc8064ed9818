//! Relay wire protocol.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": { ... }}`. Event names are snake_case and
//! payload fields are camelCase. Events without a payload omit `data`.
//!
//! Session descriptions and ICE candidates are opaque to the relay; it
//! only reads `targetId` to route them and stamps `senderId` itself.

use crate::error::{ErrorCode, ProtocolError};
use crate::types::{RoomId, SocketId, Visibility};
use serde::{Deserialize, Serialize};

/// Offer or answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description as produced by the media stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    #[must_use]
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// One room member as seen by other members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub socket_id: SocketId,
    pub nickname: String,
    pub is_host: bool,
    /// Milliseconds since the Unix epoch.
    pub join_time: i64,
}

/// Room state delivered to a joiner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMetadata {
    pub id: RoomId,
    pub title: String,
    pub category: String,
    pub host: ParticipantInfo,
    pub max_participants: usize,
    pub visibility: Visibility,
    /// Seconds since the Unix epoch.
    pub created_at: i64,
    pub in_progress: bool,
    pub question_list_id: String,
    pub question_list_contents: Vec<String>,
    pub current_index: usize,
}

/// Entry in the public room listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    pub title: String,
    pub category: String,
    pub participant_count: usize,
    pub max_participants: usize,
    pub in_progress: bool,
    pub created_at: i64,
}

/// Outcome of a start/stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Success,
    Failure,
}

/// Messages sent by a client to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    CreateRoom {
        title: String,
        category: String,
        #[serde(default)]
        visibility: Visibility,
        #[serde(default)]
        max_participants: Option<usize>,
        question_list_id: String,
    },
    ListRooms,
    Join {
        room_id: RoomId,
        nickname: String,
    },
    Offer {
        target_id: SocketId,
        description: SessionDescription,
    },
    Answer {
        target_id: SocketId,
        description: SessionDescription,
    },
    Candidate {
        target_id: SocketId,
        candidate: IceCandidate,
    },
    Reaction {
        reaction_type: String,
    },
    Start,
    Stop,
    Next,
    Prev,
    Move {
        index: i64,
    },
    Current,
    Finish,
    Leave,
}

impl ClientMessage {
    /// Event name, suitable as a bounded metric label.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::CreateRoom { .. } => "create_room",
            ClientMessage::ListRooms => "list_rooms",
            ClientMessage::Join { .. } => "join",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::Candidate { .. } => "candidate",
            ClientMessage::Reaction { .. } => "reaction",
            ClientMessage::Start => "start",
            ClientMessage::Stop => "stop",
            ClientMessage::Next => "next",
            ClientMessage::Prev => "prev",
            ClientMessage::Move { .. } => "move",
            ClientMessage::Current => "current",
            ClientMessage::Finish => "finish",
            ClientMessage::Leave => "leave",
        }
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encoding(e.to_string()))
    }

    /// Decode a text frame.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Messages sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    RoomCreated {
        room_id: RoomId,
    },
    RoomList {
        rooms: Vec<RoomSummary>,
    },
    /// Join accepted. `participants` lists every other member.
    Joined {
        self_id: SocketId,
        room: RoomMetadata,
        participants: Vec<ParticipantInfo>,
    },
    #[serde(rename = "full")]
    RoomFull,
    #[serde(rename = "progress")]
    RoomInProgress,
    #[serde(rename = "not_found")]
    RoomNotFound,
    ParticipantJoined {
        participant: ParticipantInfo,
    },
    Offer {
        sender_id: SocketId,
        sender_nickname: String,
        description: SessionDescription,
    },
    Answer {
        sender_id: SocketId,
        description: SessionDescription,
    },
    Candidate {
        sender_id: SocketId,
        candidate: IceCandidate,
    },
    Quit {
        socket_id: SocketId,
    },
    ChangeHost {
        socket_id: SocketId,
        nickname: String,
    },
    Finish,
    Start {
        status: ProgressStatus,
        in_progress: bool,
    },
    Stop {
        status: ProgressStatus,
        in_progress: bool,
    },
    /// Index set by `prev` or `move`. `-1` rejects the requester's intent.
    Index {
        current_index: i64,
    },
    /// Index re-announced by `current`. `-1` rejects the requester's intent.
    Current {
        current_index: i64,
    },
    /// Index advanced by `next`. `-1` rejects the requester's intent.
    Next {
        current_index: i64,
    },
    Reaction {
        socket_id: SocketId,
        reaction_type: String,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    /// Event name, suitable as a bounded metric label.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::RoomCreated { .. } => "room_created",
            ServerMessage::RoomList { .. } => "room_list",
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::RoomFull => "full",
            ServerMessage::RoomInProgress => "progress",
            ServerMessage::RoomNotFound => "not_found",
            ServerMessage::ParticipantJoined { .. } => "participant_joined",
            ServerMessage::Offer { .. } => "offer",
            ServerMessage::Answer { .. } => "answer",
            ServerMessage::Candidate { .. } => "candidate",
            ServerMessage::Quit { .. } => "quit",
            ServerMessage::ChangeHost { .. } => "change_host",
            ServerMessage::Finish => "finish",
            ServerMessage::Start { .. } => "start",
            ServerMessage::Stop { .. } => "stop",
            ServerMessage::Index { .. } => "index",
            ServerMessage::Current { .. } => "current",
            ServerMessage::Next { .. } => "next",
            ServerMessage::Reaction { .. } => "reaction",
            ServerMessage::Error { .. } => "error",
        }
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encoding(e.to_string()))
    }

    /// Decode a text frame.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}
