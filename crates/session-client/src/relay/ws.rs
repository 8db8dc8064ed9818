//! WebSocket relay transport on tokio-tungstenite.

use crate::errors::ClientError;
use crate::relay::listeners::ListenerRegistry;
use crate::relay::{RelayEvent, RelayTransport};
use async_trait::async_trait;
use common::protocol::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outbound frames buffered before `send` waits.
const OUTBOUND_BUFFER: usize = 64;

/// Relay connection. Inbound frames are dispatched to [`ListenerRegistry`]
/// listeners; a `Closed` event is dispatched once when the socket ends.
pub struct WsRelay {
    outbound: mpsc::Sender<ClientMessage>,
    listeners: ListenerRegistry,
    cancel_token: CancellationToken,
}

impl WsRelay {
    /// Connect to the relay gateway at `url` (e.g. `ws://host:8080/ws`).
    pub async fn connect(url: &str) -> Result<Arc<Self>, ClientError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| ClientError::Transport(format!("connect failed: {e}")))?;
        let (mut sink, mut source) = stream.split();

        let (outbound, mut outbound_rx) = mpsc::channel::<ClientMessage>(OUTBOUND_BUFFER);
        let listeners = ListenerRegistry::new();
        let cancel_token = CancellationToken::new();

        info!(target: "client.relay", url = %url, "Connected to relay");

        let writer_token = cancel_token.clone();
        tokio::spawn(async move {
            loop {
                // Queued frames (a final `leave`) go out before cancellation
                tokio::select! {
                    biased;
                    message = outbound_rx.recv() => {
                        let Some(message) = message else { break };
                        let text = match message.to_json() {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(target: "client.relay", error = %e, "Failed to encode frame");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!(target: "client.relay", error = %e, "Relay write failed");
                            break;
                        }
                    }
                    () = writer_token.cancelled() => break,
                }
            }
            let _ = sink.close().await;
            writer_token.cancel();
        });

        let reader_token = cancel_token.clone();
        let reader_listeners = listeners.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = reader_token.cancelled() => break,
                    frame = source.next() => match frame {
                        Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text) {
                            Ok(message) => {
                                reader_listeners.dispatch(&RelayEvent::Message(message));
                            }
                            Err(e) => {
                                warn!(target: "client.relay", error = %e, "Dropped undecodable frame");
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(target: "client.relay", error = %e, "Relay read failed");
                            break;
                        }
                    }
                }
            }
            reader_token.cancel();
            reader_listeners.dispatch(&RelayEvent::Closed);
            info!(target: "client.relay", "Relay connection closed");
        });

        Ok(Arc::new(Self {
            outbound,
            listeners,
            cancel_token,
        }))
    }

    /// Close the socket. Listeners receive `Closed`.
    pub fn close(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

#[async_trait]
impl RelayTransport for WsRelay {
    async fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        self.outbound
            .send(message)
            .await
            .map_err(|e| ClientError::Transport(format!("channel send failed: {e}")))
    }

    fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }
}

impl Drop for WsRelay {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
