//! WebSocket endpoint.
//!
//! Each upgraded socket gets a writer task draining its outbound channel
//! into the sink and a reader loop feeding text frames to a
//! [`ClientSession`]. Frames are JSON `{"event": ..., "data": ...}`.

use crate::actors::RoomRegistryHandle;
use crate::gateway::dispatch::ClientSession;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use common::error::ProtocolError;
use common::protocol::ServerMessage;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Outbound frames buffered per socket before backpressure applies.
const OUTBOUND_BUFFER: usize = 64;

/// How long the writer may take to flush after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Build the gateway router serving `/ws`.
pub fn gateway_router(registry: RoomRegistryHandle) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

async fn ws_handler(ws: WebSocketUpgrade, State(registry): State<RoomRegistryHandle>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

async fn handle_socket(socket: WebSocket, registry: RoomRegistryHandle) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);
    let mut session = ClientSession::new(registry, outbound_tx);
    let socket_id = session.socket_id().clone();

    let writer_done = CancellationToken::new();
    let writer_signal = writer_done.clone();
    let writer_socket_id = socket_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(
                        target: "relay.gateway",
                        socket_id = %writer_socket_id,
                        error = %e,
                        "Failed to encode server frame"
                    );
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
        writer_signal.cancel();
    });

    loop {
        tokio::select! {
            () = writer_done.cancelled() => {
                debug!(target: "relay.gateway", socket_id = %socket_id, "Writer closed, ending socket");
                break;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
                Some(Ok(Message::Binary(_))) => {
                    session.reject_frame(&ProtocolError::UnexpectedBinary).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                // axum answers pings itself
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => {
                    debug!(
                        target: "relay.gateway",
                        socket_id = %socket_id,
                        error = %e,
                        "Socket read failed"
                    );
                    break;
                }
            }
        }
    }

    session.disconnect().await;

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        warn!(
            target: "relay.gateway",
            socket_id = %socket_id,
            "Writer did not drain in time"
        );
    }
}
