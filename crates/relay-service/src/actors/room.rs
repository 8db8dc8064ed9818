//! `RoomActor` - per-room actor owning authoritative room state.
//!
//! Each `RoomActor`:
//! - Owns one room's roster, host, study progress and question list
//! - Serialises every mutation, so capacity checks and host election never race
//! - Fans out roster, progress and reaction events to member connections
//! - Relays offer/answer/candidate payloads by target socket id
//!
//! # Host election
//!
//! The first accepted join becomes host. When the host leaves, the member
//! with the earliest join time (join sequence as tie-break) is promoted and
//! `change_host` is broadcast before the departing member's `quit`.
//!
//! # Lifecycle
//!
//! 1. Spawned by the registry on room creation (pending)
//! 2. Becomes live on the first accepted join
//! 3. Exits when it empties, when the host finishes it, when cancelled, or
//!    when nobody joins within the pending TTL

use crate::errors::RelayError;
use crate::observability::metrics as prom;

use super::connection::ConnectionActorHandle;
use super::messages::{
    IndexIntent, LeaveReason, ProgressAction, RoomMessage, RoomSettings, RoomState, SignalPayload,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::error::ErrorCode;
use common::protocol::{ParticipantInfo, ProgressStatus, RoomMetadata, ServerMessage};
use common::types::{now_millis, RoomId, SocketId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Index value that rejects an index intent.
const INDEX_REJECTED: i64 = -1;

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: RoomId,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Backlog statistics of the room's mailbox.
    #[must_use]
    pub fn mailbox(&self) -> &MailboxMonitor {
        &self.mailbox
    }

    /// Join the room.
    ///
    /// A room whose actor already exited reports `RoomNotFound`.
    pub async fn join(
        &self,
        socket_id: SocketId,
        nickname: String,
        connection: ConnectionActorHandle,
    ) -> Result<(), RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Join {
                socket_id,
                nickname,
                connection,
                respond_to: tx,
            })
            .await
            .map_err(|_| RelayError::RoomNotFound(self.room_id.to_string()))?;

        rx.await
            .map_err(|_| RelayError::RoomNotFound(self.room_id.to_string()))?
    }

    pub async fn leave(&self, socket_id: SocketId, reason: LeaveReason) -> Result<(), RelayError> {
        self.post(RoomMessage::Leave { socket_id, reason }).await
    }

    pub async fn signal(
        &self,
        sender_id: SocketId,
        target_id: SocketId,
        payload: SignalPayload,
    ) -> Result<(), RelayError> {
        self.post(RoomMessage::Signal {
            sender_id,
            target_id,
            payload,
        })
        .await
    }

    pub async fn reaction(
        &self,
        socket_id: SocketId,
        reaction_type: String,
    ) -> Result<(), RelayError> {
        self.post(RoomMessage::Reaction {
            socket_id,
            reaction_type,
        })
        .await
    }

    pub async fn progress(
        &self,
        socket_id: SocketId,
        action: ProgressAction,
    ) -> Result<(), RelayError> {
        self.post(RoomMessage::Progress { socket_id, action }).await
    }

    pub async fn index(&self, socket_id: SocketId, intent: IndexIntent) -> Result<(), RelayError> {
        self.post(RoomMessage::Index { socket_id, intent }).await
    }

    pub async fn finish(&self, socket_id: SocketId) -> Result<(), RelayError> {
        self.post(RoomMessage::Finish { socket_id }).await
    }

    /// Get a snapshot of the room state.
    pub async fn get_state(&self) -> Result<RoomState, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.post(RoomMessage::GetState { respond_to: tx }).await?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn post(&self, message: RoomMessage) -> Result<(), RelayError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| RelayError::RoomNotFound(self.room_id.to_string()))
    }
}

/// One member of the room.
#[derive(Debug)]
struct Member {
    info: ParticipantInfo,
    /// Monotonic join order, breaks join-time ties.
    join_seq: u64,
    connection: ConnectionActorHandle,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    settings: RoomSettings,
    receiver: mpsc::Receiver<RoomMessage>,
    /// Cancellation token (child of the registry's token).
    cancel_token: CancellationToken,
    members: HashMap<SocketId, Member>,
    host: Option<SocketId>,
    in_progress: bool,
    current_index: usize,
    next_join_seq: u64,
    /// Set on the first accepted join.
    has_been_live: bool,
    /// Seconds since the Unix epoch.
    created_at: i64,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        settings: RoomSettings,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let room_id = settings.room_id.clone();

        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Room, room_id.as_str()));

        let actor = Self {
            mailbox: Arc::clone(&mailbox),
            settings,
            receiver,
            cancel_token: cancel_token.clone(),
            members: HashMap::new(),
            host: None,
            in_progress: false,
            current_index: 0,
            next_join_seq: 0,
            has_been_live: false,
            created_at: chrono::Utc::now().timestamp(),
            metrics,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "relay.actor.room", fields(room_id = %self.settings.room_id))]
    async fn run(mut self) {
        info!(
            target: "relay.actor.room",
            room_id = %self.settings.room_id,
            max_participants = self.settings.max_participants,
            questions = self.settings.questions.len(),
            "RoomActor started"
        );

        let pending_deadline = tokio::time::sleep(self.settings.pending_ttl);
        tokio::pin!(pending_deadline);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.actor.room",
                        room_id = %self.settings.room_id,
                        "RoomActor received cancellation signal"
                    );
                    break;
                }

                () = &mut pending_deadline, if !self.has_been_live => {
                    info!(
                        target: "relay.actor.room",
                        room_id = %self.settings.room_id,
                        ttl_seconds = self.settings.pending_ttl.as_secs(),
                        "Room expired before anyone joined"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.observe(self.receiver.len());
                            let should_exit = self.handle_message(message).await;
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "relay.actor.room",
                                room_id = %self.settings.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        for _ in self.members.drain() {
            self.metrics.participant_left();
        }

        info!(
            target: "relay.actor.room",
            room_id = %self.settings.room_id,
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: RoomMessage) -> bool {
        match message {
            RoomMessage::Join {
                socket_id,
                nickname,
                connection,
                respond_to,
            } => {
                let result = self.handle_join(socket_id, nickname, connection).await;
                let _ = respond_to.send(result);
                false
            }

            RoomMessage::Leave { socket_id, reason } => self.handle_leave(&socket_id, reason).await,

            RoomMessage::Signal {
                sender_id,
                target_id,
                payload,
            } => {
                self.handle_signal(&sender_id, &target_id, payload).await;
                false
            }

            RoomMessage::Reaction {
                socket_id,
                reaction_type,
            } => {
                self.handle_reaction(socket_id, reaction_type).await;
                false
            }

            RoomMessage::Progress { socket_id, action } => {
                self.handle_progress(&socket_id, action).await;
                false
            }

            RoomMessage::Index { socket_id, intent } => {
                self.handle_index(&socket_id, intent).await;
                false
            }

            RoomMessage::Finish { socket_id } => self.handle_finish(&socket_id).await,

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
                false
            }
        }
    }

    /// Admit a socket: conflict, capacity and in-progress checks, then ack
    /// the joiner and announce it to everyone else.
    async fn handle_join(
        &mut self,
        socket_id: SocketId,
        nickname: String,
        connection: ConnectionActorHandle,
    ) -> Result<(), RelayError> {
        if self.members.contains_key(&socket_id) {
            return Err(RelayError::Conflict("Already in this room".to_string()));
        }

        if self.members.len() >= self.settings.max_participants {
            debug!(
                target: "relay.actor.room",
                room_id = %self.settings.room_id,
                participants = self.members.len(),
                "Join rejected: room full"
            );
            return Err(RelayError::RoomFull(self.settings.room_id.to_string()));
        }

        if self.in_progress && self.settings.bar_joins_in_progress {
            debug!(
                target: "relay.actor.room",
                room_id = %self.settings.room_id,
                "Join rejected: study in progress"
            );
            return Err(RelayError::RoomInProgress(self.settings.room_id.to_string()));
        }

        let is_host = self.host.is_none();
        let info = ParticipantInfo {
            socket_id: socket_id.clone(),
            nickname,
            is_host,
            join_time: now_millis(),
        };
        let join_seq = self.next_join_seq;
        self.next_join_seq += 1;

        self.members.insert(
            socket_id.clone(),
            Member {
                info: info.clone(),
                join_seq,
                connection: connection.clone(),
            },
        );
        if is_host {
            self.host = Some(socket_id.clone());
        }
        self.has_been_live = true;
        self.metrics.participant_joined();

        let room = self
            .metadata()
            .ok_or_else(|| RelayError::Internal("room has no host after join".to_string()))?;
        let others: Vec<ParticipantInfo> = self
            .ordered_members()
            .into_iter()
            .filter(|m| m.info.socket_id != socket_id)
            .map(|m| m.info.clone())
            .collect();

        // The ack is enqueued before any broadcast so it is the joiner's first frame.
        if let Err(e) = connection
            .send(ServerMessage::Joined {
                self_id: socket_id.clone(),
                room,
                participants: others,
            })
            .await
        {
            warn!(
                target: "relay.actor.room",
                room_id = %self.settings.room_id,
                socket_id = %socket_id,
                error = %e,
                "Failed to deliver join ack"
            );
        }

        self.broadcast_except(Some(&socket_id), &ServerMessage::ParticipantJoined { participant: info })
            .await;

        info!(
            target: "relay.actor.room",
            room_id = %self.settings.room_id,
            socket_id = %socket_id,
            is_host = is_host,
            total_participants = self.members.len(),
            "Participant joined"
        );

        Ok(())
    }

    /// Remove a member, re-electing the host if needed. Returns true once
    /// the room is empty.
    async fn handle_leave(&mut self, socket_id: &SocketId, reason: LeaveReason) -> bool {
        let Some(member) = self.members.remove(socket_id) else {
            debug!(
                target: "relay.actor.room",
                room_id = %self.settings.room_id,
                socket_id = %socket_id,
                "Leave for unknown participant ignored"
            );
            return false;
        };
        self.metrics.participant_left();

        info!(
            target: "relay.actor.room",
            room_id = %self.settings.room_id,
            socket_id = %socket_id,
            reason = reason.as_str(),
            was_host = member.info.is_host,
            remaining = self.members.len(),
            "Participant left"
        );

        if self.host.as_ref() == Some(socket_id) {
            self.host = None;
            if let Some(next) = self.elect_host() {
                prom::record_host_election();
                self.broadcast(&ServerMessage::ChangeHost {
                    socket_id: next.socket_id.clone(),
                    nickname: next.nickname.clone(),
                })
                .await;

                info!(
                    target: "relay.actor.room",
                    room_id = %self.settings.room_id,
                    new_host = %next.socket_id,
                    "Host re-elected"
                );
            }
        }

        self.broadcast(&ServerMessage::Quit {
            socket_id: socket_id.clone(),
        })
        .await;

        if self.members.is_empty() {
            info!(
                target: "relay.actor.room",
                room_id = %self.settings.room_id,
                "Room empty, closing"
            );
            return true;
        }
        false
    }

    /// Promote the member with the earliest (join time, join sequence).
    fn elect_host(&mut self) -> Option<ParticipantInfo> {
        let next_id = self
            .members
            .values()
            .min_by_key(|m| (m.info.join_time, m.join_seq))
            .map(|m| m.info.socket_id.clone())?;

        let member = self.members.get_mut(&next_id)?;
        member.info.is_host = true;
        self.host = Some(next_id);
        Some(member.info.clone())
    }

    async fn handle_signal(
        &mut self,
        sender_id: &SocketId,
        target_id: &SocketId,
        payload: SignalPayload,
    ) {
        let kind = payload.kind();

        let Some(sender) = self.members.get(sender_id) else {
            debug!(
                target: "relay.actor.room",
                room_id = %self.settings.room_id,
                kind = kind,
                "Signal from non-member dropped"
            );
            prom::record_signal_dropped(kind);
            return;
        };

        let Some(target) = self.members.get(target_id) else {
            debug!(
                target: "relay.actor.room",
                room_id = %self.settings.room_id,
                sender_id = %sender_id,
                target_id = %target_id,
                kind = kind,
                "Signal for unknown target dropped"
            );
            prom::record_signal_dropped(kind);
            return;
        };

        let message = match payload {
            SignalPayload::Offer(description) => ServerMessage::Offer {
                sender_id: sender_id.clone(),
                sender_nickname: sender.info.nickname.clone(),
                description,
            },
            SignalPayload::Answer(description) => ServerMessage::Answer {
                sender_id: sender_id.clone(),
                description,
            },
            SignalPayload::Candidate(candidate) => ServerMessage::Candidate {
                sender_id: sender_id.clone(),
                candidate,
            },
        };

        if target.connection.send(message).await.is_ok() {
            prom::record_signal_relayed(kind);
        } else {
            prom::record_signal_dropped(kind);
        }
    }

    async fn handle_reaction(&mut self, socket_id: SocketId, reaction_type: String) {
        if !self.members.contains_key(&socket_id) {
            return;
        }
        self.broadcast(&ServerMessage::Reaction {
            socket_id,
            reaction_type,
        })
        .await;
    }

    async fn handle_progress(&mut self, socket_id: &SocketId, action: ProgressAction) {
        if !self.members.contains_key(socket_id) {
            return;
        }

        if !self.is_host(socket_id) {
            debug!(
                target: "relay.actor.room",
                room_id = %self.settings.room_id,
                socket_id = %socket_id,
                action = ?action,
                "Progress change rejected: not host"
            );
            let reply = progress_message(action, ProgressStatus::Failure, self.in_progress);
            self.send_to(socket_id, reply).await;
            return;
        }

        self.in_progress = matches!(action, ProgressAction::Start);
        info!(
            target: "relay.actor.room",
            room_id = %self.settings.room_id,
            in_progress = self.in_progress,
            "Study progress changed"
        );
        self.broadcast(&progress_message(
            action,
            ProgressStatus::Success,
            self.in_progress,
        ))
        .await;
    }

    async fn handle_index(&mut self, socket_id: &SocketId, intent: IndexIntent) {
        if !self.members.contains_key(socket_id) {
            return;
        }

        let max_index = self.settings.questions.len().saturating_sub(1);
        let next_index = if self.is_host(socket_id) {
            match intent {
                IndexIntent::Next => {
                    (self.current_index < max_index).then_some(self.current_index + 1)
                }
                IndexIntent::Prev => self.current_index.checked_sub(1),
                IndexIntent::Move(index) => usize::try_from(index)
                    .ok()
                    .filter(|index| *index <= max_index),
                IndexIntent::Current => Some(self.current_index),
            }
        } else {
            None
        };

        match next_index {
            Some(index) => {
                self.current_index = index;
                debug!(
                    target: "relay.actor.room",
                    room_id = %self.settings.room_id,
                    current_index = index,
                    "Index changed"
                );
                let value = i64::try_from(index).unwrap_or(INDEX_REJECTED);
                self.broadcast(&index_message(intent, value)).await;
            }
            None => {
                debug!(
                    target: "relay.actor.room",
                    room_id = %self.settings.room_id,
                    socket_id = %socket_id,
                    intent = ?intent,
                    "Index intent rejected"
                );
                self.send_to(socket_id, index_message(intent, INDEX_REJECTED))
                    .await;
            }
        }
    }

    /// Returns true when the room was finished.
    async fn handle_finish(&mut self, socket_id: &SocketId) -> bool {
        if !self.members.contains_key(socket_id) {
            return false;
        }

        if !self.is_host(socket_id) {
            let err = RelayError::PermissionDenied("Only the host can finish the room".to_string());
            self.send_to(
                socket_id,
                ServerMessage::Error {
                    code: ErrorCode::Forbidden,
                    message: err.client_message(),
                },
            )
            .await;
            return false;
        }

        info!(
            target: "relay.actor.room",
            room_id = %self.settings.room_id,
            participants = self.members.len(),
            "Room finished by host"
        );
        self.broadcast(&ServerMessage::Finish).await;
        true
    }

    fn get_state(&self) -> RoomState {
        RoomState {
            room_id: self.settings.room_id.clone(),
            title: self.settings.title.clone(),
            category: self.settings.category.clone(),
            visibility: self.settings.visibility,
            max_participants: self.settings.max_participants,
            created_at: self.created_at,
            in_progress: self.in_progress,
            current_index: self.current_index,
            question_count: self.settings.questions.len(),
            participants: self
                .ordered_members()
                .into_iter()
                .map(|m| m.info.clone())
                .collect(),
            host: self.host.clone(),
        }
    }

    fn metadata(&self) -> Option<RoomMetadata> {
        let host = self
            .host
            .as_ref()
            .and_then(|id| self.members.get(id))
            .map(|m| m.info.clone())?;

        Some(RoomMetadata {
            id: self.settings.room_id.clone(),
            title: self.settings.title.clone(),
            category: self.settings.category.clone(),
            host,
            max_participants: self.settings.max_participants,
            visibility: self.settings.visibility,
            created_at: self.created_at,
            in_progress: self.in_progress,
            question_list_id: self.settings.question_list_id.clone(),
            question_list_contents: self.settings.questions.clone(),
            current_index: self.current_index,
        })
    }

    fn is_host(&self, socket_id: &SocketId) -> bool {
        self.host.as_ref() == Some(socket_id)
    }

    fn ordered_members(&self) -> Vec<&Member> {
        let mut members: Vec<&Member> = self.members.values().collect();
        members.sort_by_key(|m| m.join_seq);
        members
    }

    async fn send_to(&self, socket_id: &SocketId, message: ServerMessage) {
        if let Some(member) = self.members.get(socket_id) {
            if let Err(e) = member.connection.send(message).await {
                debug!(
                    target: "relay.actor.room",
                    room_id = %self.settings.room_id,
                    socket_id = %socket_id,
                    error = %e,
                    "Failed to deliver message"
                );
            }
        }
    }

    async fn broadcast(&self, message: &ServerMessage) {
        self.broadcast_except(None, message).await;
    }

    /// Deliver to every member (except `except`) in join order.
    async fn broadcast_except(&self, except: Option<&SocketId>, message: &ServerMessage) {
        for member in self.ordered_members() {
            if except == Some(&member.info.socket_id) {
                continue;
            }
            if let Err(e) = member.connection.send(message.clone()).await {
                debug!(
                    target: "relay.actor.room",
                    room_id = %self.settings.room_id,
                    socket_id = %member.info.socket_id,
                    event = message.event_name(),
                    error = %e,
                    "Failed to deliver broadcast"
                );
            }
        }
    }
}

fn progress_message(action: ProgressAction, status: ProgressStatus, in_progress: bool) -> ServerMessage {
    match action {
        ProgressAction::Start => ServerMessage::Start {
            status,
            in_progress,
        },
        ProgressAction::Stop => ServerMessage::Stop {
            status,
            in_progress,
        },
    }
}

fn index_message(intent: IndexIntent, current_index: i64) -> ServerMessage {
    match intent {
        IndexIntent::Next => ServerMessage::Next { current_index },
        IndexIntent::Prev | IndexIntent::Move(_) => ServerMessage::Index { current_index },
        IndexIntent::Current => ServerMessage::Current { current_index },
    }
}
