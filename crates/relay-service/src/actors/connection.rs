//! `ConnectionActor` - per-WebSocket connection actor.
//!
//! Each `ConnectionActor`:
//! - Owns the outbound side of exactly one client socket
//! - Delivers `ServerMessage`s to the gateway writer in the order received
//! - Refuses sends once closing
//!
//! # Lifecycle
//!
//! 1. Spawned by the gateway when a socket is accepted
//! 2. Runs until the socket closes, `close` is requested, or the relay shuts down
//! 3. Cancellation via child token propagates from the registry

use crate::errors::RelayError;

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::protocol::ServerMessage;
use common::types::SocketId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    socket_id: SocketId,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn socket_id(&self) -> &SocketId {
        &self.socket_id
    }

    /// Deliver a message to the client.
    pub async fn send(&self, message: ServerMessage) -> Result<(), RelayError> {
        self.sender
            .send(ConnectionMessage::Send { message })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))
    }

    /// Close the connection.
    pub async fn close(&self, reason: String) -> Result<(), RelayError> {
        self.sender
            .send(ConnectionMessage::Close { reason })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    socket_id: SocketId,
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Frames for the socket writer. Dropped on close so the writer ends.
    outbound: Option<mpsc::Sender<ServerMessage>>,
    /// Cancellation token (child of the registry's token).
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl ConnectionActor {
    /// Spawn a new connection actor writing to `outbound`.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        socket_id: SocketId,
        outbound: mpsc::Sender<ServerMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);

        metrics.connection_created();

        let actor = Self {
            socket_id: socket_id.clone(),
            receiver,
            outbound: Some(outbound),
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Connection, socket_id.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            socket_id,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "relay.actor.connection",
        fields(socket_id = %self.socket_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "relay.actor.connection",
            socket_id = %self.socket_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "relay.actor.connection",
                        socket_id = %self.socket_id,
                        "ConnectionActor received cancellation signal"
                    );
                    self.graceful_close("cancelled");
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
                            debug!(
                                target: "relay.actor.connection",
                                socket_id = %self.socket_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.connection_closed();

        info!(
            target: "relay.actor.connection",
            socket_id = %self.socket_id,
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Send { message } => !self.handle_send(message).await,

            ConnectionMessage::Close { reason } => {
                self.graceful_close(&reason);
                true
            }
        }
    }

    /// Forward one frame to the writer. Returns false once the writer is gone.
    async fn handle_send(&mut self, message: ServerMessage) -> bool {
        let Some(outbound) = &self.outbound else {
            warn!(
                target: "relay.actor.connection",
                socket_id = %self.socket_id,
                "Attempted to send message while closing"
            );
            return false;
        };

        debug!(
            target: "relay.actor.connection",
            socket_id = %self.socket_id,
            event = message.event_name(),
            "Sending message to client"
        );

        if outbound.send(message).await.is_err() {
            debug!(
                target: "relay.actor.connection",
                socket_id = %self.socket_id,
                "Socket writer gone, closing connection actor"
            );
            self.outbound = None;
            return false;
        }
        true
    }

    fn graceful_close(&mut self, reason: &str) {
        if self.outbound.take().is_some() {
            debug!(
                target: "relay.actor.connection",
                socket_id = %self.socket_id,
                reason = %reason,
                "Closing connection"
            );
        }
    }
}
