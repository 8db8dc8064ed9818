//! `RoomRegistryActor` - singleton supervisor for room actors.
//!
//! The `RoomRegistryActor` is the top-level actor in the relay hierarchy:
//!
//! - Singleton per relay instance
//! - Supervises N `RoomActor` instances
//! - Handles room creation, lookup and listing
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Reaps finished room actors and detects panics via `JoinHandle`
//!
//! # Graceful Shutdown
//!
//! On shutdown the registry:
//! 1. Sets `accepting_new = false`
//! 2. Cancels the root `CancellationToken` (propagates to rooms and connections)
//! 3. Waits for room actors to finish

use crate::config::{Config, MIN_PARTICIPANTS};
use crate::errors::RelayError;
use crate::questions::QuestionListStore;

use super::connection::{ConnectionActor, ConnectionActorHandle};
use super::messages::{CreateRoomRequest, RegistryMessage, RegistryStatus, RoomSettings};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle};

use common::protocol::{RoomSummary, ServerMessage};
use common::types::{RoomId, SocketId, Visibility};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// How long a listing waits for each room's summary.
const ROOM_SUMMARY_TIMEOUT: Duration = Duration::from_millis(500);

/// How long shutdown waits for each room actor.
const ROOM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the `RoomRegistryActor`.
///
/// This is the public interface for interacting with the registry.
#[derive(Clone)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
}

impl RoomRegistryHandle {
    /// Spawn the registry actor and return a handle to it.
    #[must_use]
    pub fn new(
        config: &Config,
        questions: Arc<dyn QuestionListStore>,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomRegistryActor::new(
            RegistryLimits::from(config),
            questions,
            receiver,
            cancel_token.clone(),
            Arc::clone(&metrics),
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            metrics,
        }
    }

    /// Register a new room.
    pub async fn create_room(&self, request: CreateRoomRequest) -> Result<RoomId, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::CreateRoom {
                request,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get a handle to a room actor.
    pub async fn get_room(&self, room_id: RoomId) -> Result<RoomActorHandle, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetRoom {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))?
    }

    /// List public rooms.
    pub async fn list_rooms(&self) -> Result<Vec<RoomSummary>, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::ListRooms { respond_to: tx })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    pub async fn get_status(&self) -> Result<RegistryStatus, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    pub async fn shutdown(&self) -> Result<(), RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))?
    }

    /// Spawn the connection actor for a newly accepted socket.
    ///
    /// The actor is a child of the registry, so shutdown closes every socket.
    #[must_use]
    pub fn spawn_connection(
        &self,
        socket_id: SocketId,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        ConnectionActor::spawn(
            socket_id,
            outbound,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        )
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.metrics
    }
}

/// Config values the registry needs.
#[derive(Debug, Clone)]
struct RegistryLimits {
    max_rooms: usize,
    default_max_participants: usize,
    max_participants_cap: usize,
    bar_joins_in_progress: bool,
    pending_room_ttl: Duration,
}

impl From<&Config> for RegistryLimits {
    fn from(config: &Config) -> Self {
        Self {
            max_rooms: config.max_rooms,
            default_max_participants: config.default_max_participants,
            max_participants_cap: config.max_participants_cap,
            bar_joins_in_progress: config.bar_joins_in_progress,
            pending_room_ttl: config.pending_room_ttl,
        }
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
    visibility: Visibility,
}

/// The `RoomRegistryActor` implementation.
pub struct RoomRegistryActor {
    limits: RegistryLimits,
    questions: Arc<dyn QuestionListStore>,
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    rooms: HashMap<RoomId, ManagedRoom>,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomRegistryActor {
    fn new(
        limits: RegistryLimits,
        questions: Arc<dyn QuestionListStore>,
        receiver: mpsc::Receiver<RegistryMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        Self {
            limits,
            questions,
            receiver,
            cancel_token,
            rooms: HashMap::new(),
            accepting_new: true,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Registry, "registry"),
        }
    }

    #[instrument(skip_all, name = "relay.actor.registry")]
    async fn run(mut self) {
        info!(target: "relay.actor.registry", "RoomRegistryActor started");

        loop {
            // Reap finished room actors
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.actor.registry",
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.observe(self.receiver.len());
                            self.handle_message(message).await;
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "relay.actor.registry",
                                "RoomRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "relay.actor.registry",
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::CreateRoom {
                request,
                respond_to,
            } => {
                let result = self.create_room(request);
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let result = self.get_room(&room_id);
                let _ = respond_to.send(result);
            }

            RegistryMessage::ListRooms { respond_to } => {
                let rooms = self.public_rooms();
                tokio::spawn(async move {
                    let _ = respond_to.send(collect_summaries(rooms).await);
                });
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::Shutdown { respond_to } => {
                let result = self.initiate_shutdown();
                let _ = respond_to.send(result);
            }
        }
    }

    fn create_room(&mut self, request: CreateRoomRequest) -> Result<RoomId, RelayError> {
        if !self.accepting_new {
            return Err(RelayError::Draining);
        }

        if self.rooms.len() >= self.limits.max_rooms {
            return Err(RelayError::RegistryCapacityExceeded);
        }

        if request.title.trim().is_empty() {
            return Err(RelayError::InvalidRequest(
                "Room title must not be empty".to_string(),
            ));
        }

        let max_participants = request
            .max_participants
            .unwrap_or(self.limits.default_max_participants);
        if !(MIN_PARTICIPANTS..=self.limits.max_participants_cap).contains(&max_participants) {
            return Err(RelayError::InvalidRequest(format!(
                "maxParticipants must be between {MIN_PARTICIPANTS} and {}",
                self.limits.max_participants_cap
            )));
        }

        let questions = self
            .questions
            .get(&request.question_list_id)?
            .filter(|q| !q.is_empty())
            .ok_or_else(|| {
                RelayError::InvalidRequest("Question list is unknown or empty".to_string())
            })?;

        let room_id = RoomId::new();
        let settings = RoomSettings {
            room_id: room_id.clone(),
            title: request.title,
            category: request.category,
            visibility: request.visibility,
            max_participants,
            question_list_id: request.question_list_id,
            questions,
            bar_joins_in_progress: self.limits.bar_joins_in_progress,
            pending_ttl: self.limits.pending_room_ttl,
        };

        let (handle, task_handle) = RoomActor::spawn(
            settings,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle,
                task_handle,
                visibility: request.visibility,
            },
        );
        self.metrics.room_created();

        info!(
            target: "relay.actor.registry",
            room_id = %room_id,
            max_participants = max_participants,
            total_rooms = self.rooms.len(),
            "Room created"
        );

        Ok(room_id)
    }

    fn get_room(&self, room_id: &RoomId) -> Result<RoomActorHandle, RelayError> {
        self.rooms
            .get(room_id)
            .filter(|managed| !managed.task_handle.is_finished())
            .map(|managed| managed.handle.clone())
            .ok_or_else(|| RelayError::RoomNotFound(room_id.to_string()))
    }

    /// Handles of every live public room.
    fn public_rooms(&self) -> Vec<RoomActorHandle> {
        self.rooms
            .values()
            .filter(|managed| {
                managed.visibility == Visibility::Public && !managed.task_handle.is_finished()
            })
            .map(|managed| managed.handle.clone())
            .collect()
    }

    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            room_count: self.rooms.len(),
            connection_count: self.metrics.connection_count(),
            participant_count: self.metrics.participant_count(),
            is_draining: !self.accepting_new,
        }
    }

    fn initiate_shutdown(&mut self) -> Result<(), RelayError> {
        info!(
            target: "relay.actor.registry",
            room_count = self.rooms.len(),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;
        // Propagates to rooms and connections
        self.cancel_token.cancel();
        Ok(())
    }

    async fn graceful_shutdown(&mut self) {
        self.accepting_new = false;

        for (room_id, managed) in self.rooms.drain() {
            managed.handle.cancel();
            match tokio::time::timeout(ROOM_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "relay.actor.registry",
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "relay.actor.registry",
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "relay.actor.registry",
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }

        info!(target: "relay.actor.registry", "Graceful shutdown complete");
    }

    /// Remove room actors whose task has ended.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            let Some(managed) = self.rooms.remove(&room_id) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "relay.actor.registry",
                        room_id = %room_id,
                        "Room actor exited, removing room"
                    );
                }
                Err(join_error) if join_error.is_panic() => {
                    error!(
                        target: "relay.actor.registry",
                        room_id = %room_id,
                        error = ?join_error,
                        "Room actor panicked - triggering investigation"
                    );
                    self.metrics.record_panic(ActorType::Room);
                }
                Err(_) => {}
            }

            self.metrics.room_removed();
        }
    }
}

/// Ask each room for its summary, concurrently and off the registry task.
/// Rooms that do not answer within [`ROOM_SUMMARY_TIMEOUT`] are left out.
async fn collect_summaries(rooms: Vec<RoomActorHandle>) -> Vec<RoomSummary> {
    let replies = join_all(rooms.iter().map(|room| async move {
        (
            room.room_id(),
            tokio::time::timeout(ROOM_SUMMARY_TIMEOUT, room.get_state()).await,
        )
    }))
    .await;

    let mut summaries = Vec::new();
    for (room_id, reply) in replies {
        match reply {
            Ok(Ok(state)) => summaries.push(state.summary()),
            Ok(Err(e)) => {
                debug!(
                    target: "relay.actor.registry",
                    room_id = %room_id,
                    error = %e,
                    "Skipping room that did not answer"
                );
            }
            Err(_) => {
                warn!(
                    target: "relay.actor.registry",
                    room_id = %room_id,
                    timeout = ?ROOM_SUMMARY_TIMEOUT,
                    "Skipping room that timed out answering a listing"
                );
            }
        }
    }
    summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
    summaries
}
