//! End-to-end tests for the WebSocket gateway over a real socket.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::error::ErrorCode;
use common::protocol::{ClientMessage, ServerMessage, SessionDescription};
use common::types::{RoomId, Visibility};
use futures_util::{SinkExt, StreamExt};
use relay_service::actors::{ActorMetrics, RoomRegistryHandle};
use relay_service::config::Config;
use relay_service::gateway::gateway_router;
use relay_service::questions::InMemoryQuestionStore;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_gateway() -> (SocketAddr, RoomRegistryHandle) {
    let store = InMemoryQuestionStore::new().with_list("q1", vec!["one".to_string()]);
    let registry = RoomRegistryHandle::new(&Config::default(), Arc::new(store), ActorMetrics::new());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = gateway_router(registry.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, registry)
}

async fn connect(addr: SocketAddr) -> Socket {
    let (socket, _response) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, message: &ClientMessage) {
    socket
        .send(Message::Text(message.to_json().unwrap()))
        .await
        .unwrap();
}

async fn recv(socket: &mut Socket) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return ServerMessage::from_json(&text).unwrap();
        }
    }
}

async fn create_room(socket: &mut Socket) -> RoomId {
    send(
        socket,
        &ClientMessage::CreateRoom {
            title: "Networks".to_string(),
            category: "cs".to_string(),
            visibility: Visibility::Public,
            max_participants: Some(2),
            question_list_id: "q1".to_string(),
        },
    )
    .await;
    match recv(socket).await {
        ServerMessage::RoomCreated { room_id } => room_id,
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_create_and_list_over_websocket() {
    let (addr, registry) = start_gateway().await;
    let mut socket = connect(addr).await;

    let room_id = create_room(&mut socket).await;

    send(&mut socket, &ClientMessage::ListRooms).await;
    match recv(&mut socket).await {
        ServerMessage::RoomList { rooms } => {
            assert_eq!(rooms.len(), 1);
            assert_eq!(rooms[0].id, room_id);
            assert_eq!(rooms[0].participant_count, 0);
        }
        other => panic!("unexpected {other:?}"),
    }

    registry.cancel();
}

#[tokio::test]
async fn test_malformed_and_binary_frames_get_error() {
    let (addr, registry) = start_gateway().await;
    let mut socket = connect(addr).await;

    socket
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();
    match recv(&mut socket).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::InvalidRequest),
        other => panic!("unexpected {other:?}"),
    }

    socket.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    match recv(&mut socket).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::InvalidRequest),
        other => panic!("unexpected {other:?}"),
    }

    registry.cancel();
}

#[tokio::test]
async fn test_two_sockets_exchange_offer_and_see_disconnect() {
    let (addr, registry) = start_gateway().await;
    let mut host = connect(addr).await;
    let mut guest = connect(addr).await;

    let room_id = create_room(&mut host).await;

    send(
        &mut host,
        &ClientMessage::Join {
            room_id: room_id.clone(),
            nickname: "ann".to_string(),
        },
    )
    .await;
    let host_id = match recv(&mut host).await {
        ServerMessage::Joined { self_id, .. } => self_id,
        other => panic!("unexpected {other:?}"),
    };

    send(
        &mut guest,
        &ClientMessage::Join {
            room_id,
            nickname: "bob".to_string(),
        },
    )
    .await;
    let guest_id = match recv(&mut guest).await {
        ServerMessage::Joined { self_id, .. } => self_id,
        other => panic!("unexpected {other:?}"),
    };
    assert!(matches!(
        recv(&mut host).await,
        ServerMessage::ParticipantJoined { .. }
    ));

    send(
        &mut guest,
        &ClientMessage::Offer {
            target_id: host_id.clone(),
            description: SessionDescription::offer("v=0"),
        },
    )
    .await;
    match recv(&mut host).await {
        ServerMessage::Offer {
            sender_id,
            sender_nickname,
            ..
        } => {
            assert_eq!(sender_id, guest_id);
            assert_eq!(sender_nickname, "bob");
        }
        other => panic!("unexpected {other:?}"),
    }

    // Dropping the host socket re-elects the guest
    host.close(None).await.unwrap();
    match recv(&mut guest).await {
        ServerMessage::ChangeHost { socket_id, .. } => assert_eq!(socket_id, guest_id),
        other => panic!("unexpected {other:?}"),
    }
    match recv(&mut guest).await {
        ServerMessage::Quit { socket_id } => assert_eq!(socket_id, host_id),
        other => panic!("unexpected {other:?}"),
    }

    registry.cancel();
}
