//! Client session.
//!
//! `Session::join` acquires local media, joins through the relay and, on
//! an accepted join, spawns the session actor: the single event loop that
//! applies relay events, connection events, reaction expiries, stall checks
//! and commands from `SessionHandle`s, one at a time in receipt order.
//!
//! Teardown always runs in the same order: peer links are closed, pending
//! reaction timers are cancelled, relay subscriptions are disposed, and
//! only then is `leave` sent (on an explicit leave).

use crate::config::{ClientConfig, MAX_DURATION_MS};
use crate::errors::ClientError;
use crate::media::{MediaSource, RemoteStream};
use crate::peer::{ConnectionEvent, ConnectionFactory, LinkEvent, PeerLinkManager, PeerLinkView};
use crate::progress::{ProgressAction, ProgressState, ProgressUpdate};
use crate::reactions::ReactionBroadcaster;
use crate::relay::{EventKind, RelayEvent, RelayTransport, Subscription, SubscriptionGroup};
use crate::roster::Roster;
use common::error::ErrorCode;
use common::protocol::{ClientMessage, ParticipantInfo, RoomMetadata, ServerMessage};
use common::types::{RoomId, SocketId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Commands buffered per session.
const SESSION_CHANNEL_BUFFER: usize = 64;

/// Notices buffered for slow subscribers before they start lagging.
const NOTICE_CHANNEL_BUFFER: usize = 128;

/// Who is joining. Supplied by the identity provider.
#[derive(Debug, Clone)]
pub struct Identity {
    pub nickname: String,
    pub user_id: Option<String>,
}

impl Identity {
    #[must_use]
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            user_id: None,
        }
    }
}

/// Collaborators a session is built from.
#[derive(Clone)]
pub struct SessionDeps {
    pub config: ClientConfig,
    pub relay: Arc<dyn RelayTransport>,
    pub media: Arc<dyn MediaSource>,
    pub connections: Arc<dyn ConnectionFactory>,
}

/// Study intents. Only the host's are accepted by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudyIntent {
    Start,
    Stop,
    Next,
    Prev,
    Move(i64),
    Current,
}

impl StudyIntent {
    fn into_message(self) -> ClientMessage {
        match self {
            StudyIntent::Start => ClientMessage::Start,
            StudyIntent::Stop => ClientMessage::Stop,
            StudyIntent::Next => ClientMessage::Next,
            StudyIntent::Prev => ClientMessage::Prev,
            StudyIntent::Move(index) => ClientMessage::Move { index },
            StudyIntent::Current => ClientMessage::Current,
        }
    }
}

/// User-facing notices ("toasts") emitted by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    ParticipantJoined {
        socket_id: SocketId,
        nickname: String,
    },
    ParticipantLeft {
        socket_id: SocketId,
    },
    HostChanged {
        socket_id: SocketId,
        nickname: String,
        is_local: bool,
    },
    ProgressChanged {
        in_progress: bool,
    },
    ProgressRejected {
        action: ProgressAction,
    },
    IndexChanged {
        current_index: usize,
    },
    IndexRejected,
    Reaction {
        socket_id: SocketId,
        reaction_type: String,
    },
    ReactionCleared {
        socket_id: SocketId,
    },
    RemoteStream {
        peer_id: SocketId,
        stream: RemoteStream,
    },
    PeerConnected {
        peer_id: SocketId,
    },
    PeerTransportFailed {
        peer_id: SocketId,
    },
    NegotiationFailed {
        peer_id: SocketId,
        reason: String,
    },
    Renegotiating {
        peer_id: SocketId,
        attempt: u32,
    },
    NegotiationStalled {
        peer_id: SocketId,
        attempts: u32,
    },
    RelayError {
        code: ErrorCode,
        message: String,
    },
    Finished,
}

/// Why the session actor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    Left,
    Finished,
    RelayClosed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub self_id: SocketId,
    pub room_id: RoomId,
    pub title: String,
    pub is_host: bool,
    pub participants: Vec<ParticipantInfo>,
    pub current_index: usize,
    pub in_progress: bool,
    pub current_question: Option<String>,
    pub links: Vec<PeerLinkView>,
    pub reactions: Vec<(SocketId, String)>,
}

enum SessionCommand {
    Intent(StudyIntent),
    React(String),
    Finish,
    Leave {
        respond_to: oneshot::Sender<()>,
    },
    Snapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
}

/// Handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
    cancel_token: CancellationToken,
    notices: broadcast::Sender<Notice>,
    self_id: SocketId,
    room_id: RoomId,
}

impl SessionHandle {
    #[must_use]
    pub fn self_id(&self) -> &SocketId {
        &self.self_id
    }

    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Subscribe to notices emitted from now on.
    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub async fn start(&self) -> Result<(), ClientError> {
        self.intent(StudyIntent::Start).await
    }

    pub async fn stop(&self) -> Result<(), ClientError> {
        self.intent(StudyIntent::Stop).await
    }

    pub async fn next(&self) -> Result<(), ClientError> {
        self.intent(StudyIntent::Next).await
    }

    pub async fn prev(&self) -> Result<(), ClientError> {
        self.intent(StudyIntent::Prev).await
    }

    pub async fn move_to(&self, index: i64) -> Result<(), ClientError> {
        self.intent(StudyIntent::Move(index)).await
    }

    /// Ask the relay to re-announce the current index.
    pub async fn set_current(&self) -> Result<(), ClientError> {
        self.intent(StudyIntent::Current).await
    }

    pub async fn intent(&self, intent: StudyIntent) -> Result<(), ClientError> {
        self.post(SessionCommand::Intent(intent)).await
    }

    pub async fn react(&self, reaction_type: impl Into<String>) -> Result<(), ClientError> {
        self.post(SessionCommand::React(reaction_type.into())).await
    }

    /// End the room for everyone (host only; enforced by the relay).
    pub async fn finish(&self) -> Result<(), ClientError> {
        self.post(SessionCommand::Finish).await
    }

    /// Tear the session down and leave the room. Resolves after `leave`
    /// has been sent.
    pub async fn leave(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.post(SessionCommand::Leave { respond_to: tx }).await?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.post(SessionCommand::Snapshot { respond_to: tx }).await?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Tear down without sending `leave`.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn post(&self, command: SessionCommand) -> Result<(), ClientError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| ClientError::Closed)
    }
}

pub struct Session;

impl Session {
    /// Join `room_id`.
    ///
    /// Fails with `Resource` before contacting the relay if local media
    /// cannot be acquired, and with `Capacity`, `InProgress`, `NotFound`
    /// or `JoinTimeout` if the relay does not accept the join.
    #[instrument(skip_all, name = "client.session.join", fields(room_id = %room_id))]
    pub async fn join(
        deps: SessionDeps,
        identity: Identity,
        room_id: RoomId,
    ) -> Result<(SessionHandle, JoinHandle<SessionExit>), ClientError> {
        let local_media = deps.media.acquire().await.map_err(|e| match e {
            ClientError::Resource(_) => e,
            other => ClientError::Resource(other.to_string()),
        })?;

        let mut subscriptions = SubscriptionGroup::new(deps.relay.listeners().clone());
        let mut events = subscriptions.subscribe(EventKind::SESSION);

        deps.relay
            .send(ClientMessage::Join {
                room_id: room_id.clone(),
                nickname: identity.nickname.clone(),
            })
            .await?;

        let (self_id, room, others) =
            tokio::time::timeout(deps.config.join_timeout, await_join_outcome(&mut events))
                .await
                .map_err(|_| ClientError::JoinTimeout)??;

        info!(
            target: "client.session",
            self_id = %self_id,
            user_id = ?identity.user_id,
            participants = others.len() + 1,
            in_progress = room.in_progress,
            "Join accepted"
        );

        let (roster, peers) = Roster::seed(self_id.clone(), &identity.nickname, &room, others);
        let progress = ProgressState::new(
            room.question_list_contents.clone(),
            room.current_index,
            room.in_progress,
        );
        let (mut links, connection_events) = PeerLinkManager::new(
            self_id.clone(),
            local_media,
            Arc::clone(&deps.connections),
            Arc::clone(&deps.relay),
            deps.config.negotiation_stall_timeout,
            deps.config.max_renegotiation_attempts,
        );

        // Everyone already present gets an offer from the newcomer
        for peer in &peers {
            if let Err(e) = links
                .create_peer_link(&peer.socket_id, &peer.nickname, true)
                .await
            {
                warn!(
                    target: "client.session",
                    peer_id = %peer.socket_id,
                    error = %e,
                    "Initial offer failed"
                );
            }
        }

        let (sender, commands) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = SessionActor {
            self_id: self_id.clone(),
            room_id: room.id.clone(),
            title: room.title,
            relay: Arc::clone(&deps.relay),
            commands,
            cancel_token: cancel_token.clone(),
            notices: notices.clone(),
            events,
            subscriptions,
            connection_events,
            links,
            roster,
            progress,
            reactions: ReactionBroadcaster::new(deps.config.reaction_timeout),
            stall_check_interval: deps.config.stall_check_interval,
            leave_ack: None,
        };
        let task = tokio::spawn(actor.run());

        let handle = SessionHandle {
            sender,
            cancel_token,
            notices,
            self_id,
            room_id,
        };
        Ok((handle, task))
    }
}

/// Wait for the reply to our join.
async fn await_join_outcome(
    events: &mut Subscription,
) -> Result<(SocketId, RoomMetadata, Vec<ParticipantInfo>), ClientError> {
    loop {
        let message = match events.recv().await {
            Some(RelayEvent::Message(message)) => message,
            Some(RelayEvent::Closed) | None => {
                return Err(ClientError::Transport(
                    "relay closed before join completed".to_string(),
                ))
            }
        };

        match message {
            ServerMessage::Joined {
                self_id,
                room,
                participants,
            } => return Ok((self_id, room, participants)),
            ServerMessage::RoomFull => return Err(ClientError::Capacity),
            ServerMessage::RoomInProgress => return Err(ClientError::InProgress),
            ServerMessage::RoomNotFound => return Err(ClientError::NotFound),
            ServerMessage::Error { code, message } => {
                return Err(match code {
                    ErrorCode::Unauthorized | ErrorCode::Forbidden => {
                        ClientError::Authorization(message)
                    }
                    ErrorCode::NotFound => ClientError::NotFound,
                    ErrorCode::CapacityExceeded => ClientError::Capacity,
                    _ => ClientError::Protocol(message),
                })
            }
            other => {
                debug!(
                    target: "client.session",
                    event = other.event_name(),
                    "Event before join outcome ignored"
                );
            }
        }
    }
}

struct SessionActor {
    self_id: SocketId,
    room_id: RoomId,
    title: String,
    relay: Arc<dyn RelayTransport>,
    commands: mpsc::Receiver<SessionCommand>,
    cancel_token: CancellationToken,
    notices: broadcast::Sender<Notice>,
    events: Subscription,
    subscriptions: SubscriptionGroup,
    connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    links: PeerLinkManager,
    roster: Roster,
    progress: ProgressState,
    reactions: ReactionBroadcaster,
    stall_check_interval: Duration,
    leave_ack: Option<oneshot::Sender<()>>,
}

impl SessionActor {
    #[instrument(skip_all, name = "client.session", fields(room_id = %self.room_id, self_id = %self.self_id))]
    async fn run(mut self) -> SessionExit {
        let period = self
            .stall_check_interval
            .clamp(Duration::from_millis(1), Duration::from_millis(MAX_DURATION_MS));
        let mut stall_ticker = tokio::time::interval_at(Instant::now() + period, period);
        stall_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            target: "client.session",
            links = self.links.len(),
            "Session started"
        );

        let exit = loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break SessionExit::Cancelled,

                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Some(exit) = self.handle_command(command).await {
                            break exit;
                        }
                    }
                    None => break SessionExit::Cancelled,
                },

                event = self.events.recv() => match event {
                    Some(RelayEvent::Message(message)) => {
                        if let Some(exit) = self.handle_server_message(message).await {
                            break exit;
                        }
                    }
                    Some(RelayEvent::Closed) | None => break SessionExit::RelayClosed,
                },

                Some(event) = self.connection_events.recv() => {
                    if let Some(link_event) = self.links.handle_connection_event(event).await {
                        self.notify_link_event(link_event);
                    }
                }

                socket_id = self.reactions.next_expired() => {
                    self.notify(Notice::ReactionCleared { socket_id });
                }

                _ = stall_ticker.tick() => {
                    for link_event in self.links.check_stalls().await {
                        self.notify_link_event(link_event);
                    }
                }
            }
        };

        self.teardown(exit).await;
        exit
    }

    async fn handle_command(&mut self, command: SessionCommand) -> Option<SessionExit> {
        match command {
            SessionCommand::Intent(intent) => {
                self.send(intent.into_message()).await;
                None
            }
            SessionCommand::React(reaction_type) => {
                // Shown locally once the relay echoes it back
                self.send(ClientMessage::Reaction { reaction_type }).await;
                None
            }
            SessionCommand::Finish => {
                self.send(ClientMessage::Finish).await;
                None
            }
            SessionCommand::Leave { respond_to } => {
                self.leave_ack = Some(respond_to);
                Some(SessionExit::Left)
            }
            SessionCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
                None
            }
        }
    }

    async fn handle_server_message(&mut self, message: ServerMessage) -> Option<SessionExit> {
        match message {
            ServerMessage::Offer {
                sender_id,
                sender_nickname,
                description,
            } => {
                if let Err(e) = self
                    .links
                    .handle_remote_offer(&sender_id, &sender_nickname, description)
                    .await
                {
                    self.notify_negotiation_failure(sender_id, &e);
                }
            }
            ServerMessage::Answer {
                sender_id,
                description,
            } => {
                if let Err(e) = self.links.handle_remote_answer(&sender_id, description).await {
                    self.notify_negotiation_failure(sender_id, &e);
                }
            }
            ServerMessage::Candidate {
                sender_id,
                candidate,
            } => {
                if let Err(e) = self.links.handle_remote_candidate(&sender_id, candidate).await {
                    self.notify_negotiation_failure(sender_id, &e);
                }
            }

            ServerMessage::ParticipantJoined { participant } => {
                let notice = Notice::ParticipantJoined {
                    socket_id: participant.socket_id.clone(),
                    nickname: participant.nickname.clone(),
                };
                self.roster.apply_joined(participant);
                self.notify(notice);
            }
            ServerMessage::Quit { socket_id } => {
                if socket_id == self.self_id {
                    return None;
                }
                self.links.close_peer_link(&socket_id).await;
                self.roster.apply_quit(&socket_id);
                self.reactions.clear(&socket_id);
                self.notify(Notice::ParticipantLeft { socket_id });
            }
            ServerMessage::ChangeHost {
                socket_id,
                nickname,
            } => {
                self.roster.apply_change_host(&socket_id, &nickname);
                let is_local = socket_id == self.self_id;
                self.notify(Notice::HostChanged {
                    socket_id,
                    nickname,
                    is_local,
                });
            }

            ServerMessage::Start {
                status,
                in_progress,
            } => {
                let update = self
                    .progress
                    .apply_progress(ProgressAction::Start, status, in_progress);
                self.notify_progress(update);
            }
            ServerMessage::Stop {
                status,
                in_progress,
            } => {
                let update = self
                    .progress
                    .apply_progress(ProgressAction::Stop, status, in_progress);
                self.notify_progress(update);
            }
            ServerMessage::Index { current_index }
            | ServerMessage::Current { current_index }
            | ServerMessage::Next { current_index } => {
                let update = self.progress.apply_index(current_index);
                self.notify_progress(update);
            }

            ServerMessage::Reaction {
                socket_id,
                reaction_type,
            } => {
                self.reactions
                    .record(socket_id.clone(), reaction_type.clone());
                self.notify(Notice::Reaction {
                    socket_id,
                    reaction_type,
                });
            }

            ServerMessage::Error { code, message } => {
                warn!(
                    target: "client.session",
                    code = %code,
                    message = %message,
                    "Relay reported an error"
                );
                self.notify(Notice::RelayError { code, message });
            }

            ServerMessage::Finish => {
                info!(target: "client.session", "Room finished by host");
                self.notify(Notice::Finished);
                return Some(SessionExit::Finished);
            }

            other => {
                debug!(
                    target: "client.session",
                    event = other.event_name(),
                    "Unexpected event ignored"
                );
            }
        }
        None
    }

    async fn teardown(&mut self, exit: SessionExit) {
        let links_closed = self.links.close_all().await;
        let timers_cancelled = self.reactions.dispose();
        let listeners_removed = self.subscriptions.dispose();

        if exit == SessionExit::Left {
            self.send(ClientMessage::Leave).await;
        }
        if let Some(ack) = self.leave_ack.take() {
            let _ = ack.send(());
        }

        info!(
            target: "client.session",
            reason = ?exit,
            links_closed = links_closed,
            timers_cancelled = timers_cancelled,
            listeners_removed = listeners_removed,
            "Session stopped"
        );
    }

    async fn send(&self, message: ClientMessage) {
        let event = message.event_name();
        if let Err(e) = self.relay.send(message).await {
            warn!(
                target: "client.session",
                event = event,
                error = %e,
                "Failed to send to relay"
            );
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            self_id: self.self_id.clone(),
            room_id: self.room_id.clone(),
            title: self.title.clone(),
            is_host: self.roster.is_local_host(),
            participants: self.roster.participants().to_vec(),
            current_index: self.progress.current_index(),
            in_progress: self.progress.in_progress(),
            current_question: self.progress.current_question().map(ToString::to_string),
            links: self.links.views(),
            reactions: self.reactions.active(),
        }
    }

    fn notify(&self, notice: Notice) {
        // No receivers is fine
        let _ = self.notices.send(notice);
    }

    fn notify_progress(&self, update: ProgressUpdate) {
        let notice = match update {
            ProgressUpdate::IndexAdopted { current_index } => Notice::IndexChanged { current_index },
            ProgressUpdate::IndexRejected => Notice::IndexRejected,
            ProgressUpdate::ProgressChanged { in_progress } => Notice::ProgressChanged { in_progress },
            ProgressUpdate::ProgressRejected { action } => Notice::ProgressRejected { action },
        };
        self.notify(notice);
    }

    fn notify_link_event(&self, event: LinkEvent) {
        let notice = match event {
            LinkEvent::RemoteStream { peer_id, stream } => Notice::RemoteStream { peer_id, stream },
            LinkEvent::Connected { peer_id } => Notice::PeerConnected { peer_id },
            LinkEvent::TransportFailed { peer_id } => Notice::PeerTransportFailed { peer_id },
            LinkEvent::Renegotiated { peer_id, attempt } => Notice::Renegotiating { peer_id, attempt },
            LinkEvent::Stalled { peer_id, attempts } => Notice::NegotiationStalled { peer_id, attempts },
        };
        self.notify(notice);
    }

    fn notify_negotiation_failure(&self, peer_id: SocketId, error: &ClientError) {
        self.notify(Notice::NegotiationFailed {
            peer_id,
            reason: error.to_string(),
        });
    }
}
