//! Per-socket client session.
//!
//! A `ClientSession` owns the relay side of one client socket: its
//! `SocketId`, its `ConnectionActor`, and the room it has joined (if any).
//! Decoded client events are routed to the registry or the room actor;
//! replies that only concern this socket are sent through its connection.

use crate::actors::{
    ConnectionActorHandle, CreateRoomRequest, IndexIntent, LeaveReason, ProgressAction,
    RoomActorHandle, RoomRegistryHandle, SignalPayload,
};
use crate::errors::RelayError;
use crate::observability::metrics as prom;

use common::error::{ErrorCode, ProtocolError};
use common::protocol::{ClientMessage, ServerMessage};
use common::types::{RoomId, SocketId};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Relay state for one connected socket.
pub struct ClientSession {
    socket_id: SocketId,
    registry: RoomRegistryHandle,
    connection: ConnectionActorHandle,
    connection_task: JoinHandle<()>,
    room: Option<RoomActorHandle>,
}

impl ClientSession {
    /// Register a new socket whose outbound frames go to `outbound`.
    #[must_use]
    pub fn new(registry: RoomRegistryHandle, outbound: mpsc::Sender<ServerMessage>) -> Self {
        let socket_id = SocketId::new();
        let (connection, connection_task) = registry.spawn_connection(socket_id.clone(), outbound);

        debug!(
            target: "relay.gateway",
            socket_id = %socket_id,
            "Client session opened"
        );

        Self {
            socket_id,
            registry,
            connection,
            connection_task,
            room: None,
        }
    }

    #[must_use]
    pub fn socket_id(&self) -> &SocketId {
        &self.socket_id
    }

    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        self.room.as_ref().map(RoomActorHandle::room_id)
    }

    /// True once the connection actor has stopped (shutdown or closed writer).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.connection_task.is_finished()
    }

    /// Decode and handle one text frame.
    pub async fn handle_text(&mut self, text: &str) {
        match ClientMessage::from_json(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => self.reject_frame(&e).await,
        }
    }

    /// Report an undecodable frame to the client.
    pub async fn reject_frame(&mut self, error: &ProtocolError) {
        debug!(
            target: "relay.gateway",
            socket_id = %self.socket_id,
            error = %error,
            "Rejected client frame"
        );
        self.reply(ServerMessage::Error {
            code: ErrorCode::InvalidRequest,
            message: "Malformed message".to_string(),
        })
        .await;
    }

    /// Route one client event.
    pub async fn handle(&mut self, message: ClientMessage) {
        let event = message.event_name();
        let started = Instant::now();

        match message {
            ClientMessage::CreateRoom {
                title,
                category,
                visibility,
                max_participants,
                question_list_id,
            } => {
                let request = CreateRoomRequest {
                    title,
                    category,
                    visibility,
                    max_participants,
                    question_list_id,
                };
                match self.registry.create_room(request).await {
                    Ok(room_id) => self.reply(ServerMessage::RoomCreated { room_id }).await,
                    Err(e) => self.reply_error(&e).await,
                }
            }

            ClientMessage::ListRooms => match self.registry.list_rooms().await {
                Ok(rooms) => self.reply(ServerMessage::RoomList { rooms }).await,
                Err(e) => self.reply_error(&e).await,
            },

            ClientMessage::Join { room_id, nickname } => self.join(room_id, nickname).await,

            ClientMessage::Offer {
                target_id,
                description,
            } => {
                self.signal(target_id, SignalPayload::Offer(description))
                    .await;
            }
            ClientMessage::Answer {
                target_id,
                description,
            } => {
                self.signal(target_id, SignalPayload::Answer(description))
                    .await;
            }
            ClientMessage::Candidate {
                target_id,
                candidate,
            } => {
                self.signal(target_id, SignalPayload::Candidate(candidate))
                    .await;
            }

            ClientMessage::Reaction { reaction_type } => {
                let socket_id = self.socket_id.clone();
                self.with_room(|room| async move { room.reaction(socket_id, reaction_type).await })
                    .await;
            }

            ClientMessage::Start => self.progress(ProgressAction::Start).await,
            ClientMessage::Stop => self.progress(ProgressAction::Stop).await,

            ClientMessage::Next => self.index(IndexIntent::Next).await,
            ClientMessage::Prev => self.index(IndexIntent::Prev).await,
            ClientMessage::Move { index } => self.index(IndexIntent::Move(index)).await,
            ClientMessage::Current => self.index(IndexIntent::Current).await,

            ClientMessage::Finish => {
                let socket_id = self.socket_id.clone();
                self.with_room(|room| async move { room.finish(socket_id).await })
                    .await;
            }

            ClientMessage::Leave => self.leave(LeaveReason::Explicit).await,
        }

        prom::record_message_latency(event, started.elapsed());
    }

    /// Tear down after the socket closed.
    pub async fn disconnect(mut self) {
        self.leave(LeaveReason::Disconnected).await;
        let _ = self.connection.close("socket closed".to_string()).await;

        debug!(
            target: "relay.gateway",
            socket_id = %self.socket_id,
            "Client session closed"
        );
    }

    async fn join(&mut self, room_id: RoomId, nickname: String) {
        if let Some(current) = &self.room {
            // A finished or emptied room no longer counts as membership
            if current.get_state().await.is_ok() {
                prom::record_join("conflict");
                self.reply_error(&RelayError::Conflict("Already in a room".to_string()))
                    .await;
                return;
            }
            self.room = None;
        }

        let nickname = nickname.trim().to_string();
        if nickname.is_empty() {
            prom::record_join("error");
            self.reply_error(&RelayError::InvalidRequest(
                "Nickname must not be empty".to_string(),
            ))
            .await;
            return;
        }

        let result = match self.registry.get_room(room_id).await {
            Ok(room) => room
                .join(self.socket_id.clone(), nickname, self.connection.clone())
                .await
                .map(|()| room),
            Err(e) => Err(e),
        };

        match result {
            Ok(room) => {
                prom::record_join("accepted");
                info!(
                    target: "relay.gateway",
                    socket_id = %self.socket_id,
                    room_id = %room.room_id(),
                    "Socket joined room"
                );
                self.room = Some(room);
            }
            Err(RelayError::RoomNotFound(_)) => {
                prom::record_join("not_found");
                self.reply(ServerMessage::RoomNotFound).await;
            }
            Err(RelayError::RoomFull(_)) => {
                prom::record_join("full");
                self.reply(ServerMessage::RoomFull).await;
            }
            Err(RelayError::RoomInProgress(_)) => {
                prom::record_join("in_progress");
                self.reply(ServerMessage::RoomInProgress).await;
            }
            Err(e) => {
                prom::record_join("error");
                self.reply_error(&e).await;
            }
        }
    }

    async fn signal(&mut self, target_id: SocketId, payload: SignalPayload) {
        let Some(room) = &self.room else {
            debug!(
                target: "relay.gateway",
                socket_id = %self.socket_id,
                kind = payload.kind(),
                "Signal outside a room dropped"
            );
            prom::record_signal_dropped(payload.kind());
            return;
        };

        if room
            .signal(self.socket_id.clone(), target_id, payload)
            .await
            .is_err()
        {
            self.room = None;
        }
    }

    async fn progress(&mut self, action: ProgressAction) {
        let socket_id = self.socket_id.clone();
        self.with_room(|room| async move { room.progress(socket_id, action).await })
            .await;
    }

    async fn index(&mut self, intent: IndexIntent) {
        let socket_id = self.socket_id.clone();
        self.with_room(|room| async move { room.index(socket_id, intent).await })
            .await;
    }

    async fn leave(&mut self, reason: LeaveReason) {
        if let Some(room) = self.room.take() {
            if let Err(e) = room.leave(self.socket_id.clone(), reason).await {
                debug!(
                    target: "relay.gateway",
                    socket_id = %self.socket_id,
                    error = %e,
                    "Room already gone on leave"
                );
            }
        }
    }

    /// Run a room operation, reporting `not_found` when there is no live room.
    async fn with_room<F, Fut>(&mut self, op: F)
    where
        F: FnOnce(RoomActorHandle) -> Fut,
        Fut: std::future::Future<Output = Result<(), RelayError>>,
    {
        let Some(room) = self.room.clone() else {
            self.reply_error(&RelayError::RoomNotFound("not in a room".to_string()))
                .await;
            return;
        };

        if let Err(e) = op(room).await {
            self.room = None;
            self.reply_error(&e).await;
        }
    }

    async fn reply(&self, message: ServerMessage) {
        if let Err(e) = self.connection.send(message).await {
            warn!(
                target: "relay.gateway",
                socket_id = %self.socket_id,
                error = %e,
                "Failed to reply to client"
            );
        }
    }

    async fn reply_error(&self, error: &RelayError) {
        self.reply(ServerMessage::Error {
            code: error.error_code(),
            message: error.client_message(),
        })
        .await;
    }
}
