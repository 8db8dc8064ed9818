//! Room lifecycle tests through the per-socket dispatch layer.
//!
//! Each simulated client is a `ClientSession` whose outbound frames land in
//! an in-memory channel, so the full registry/room/connection actor stack
//! runs without a network.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::sync::Arc;
use std::time::Duration;

use common::error::ErrorCode;
use common::protocol::{
    ClientMessage, IceCandidate, ProgressStatus, ServerMessage, SessionDescription,
};
use common::types::{RoomId, SocketId, Visibility};
use relay_service::actors::{ActorMetrics, RoomRegistryHandle};
use relay_service::config::Config;
use relay_service::errors::RelayError;
use relay_service::gateway::ClientSession;
use relay_service::questions::InMemoryQuestionStore;
use tokio::sync::mpsc;

// ============================================================================
// Harness
// ============================================================================

struct TestClient {
    session: ClientSession,
    rx: mpsc::Receiver<ServerMessage>,
}

impl TestClient {
    fn connect(registry: &RoomRegistryHandle) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            session: ClientSession::new(registry.clone(), tx),
            rx,
        }
    }

    fn id(&self) -> SocketId {
        self.session.socket_id().clone()
    }

    async fn send(&mut self, message: ClientMessage) {
        self.session.handle(message).await;
    }

    async fn next(&mut self) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(1), self.rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("outbound closed")
    }

    /// Collect every frame that arrives within a short quiet period.
    async fn drain(&mut self) -> Vec<ServerMessage> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) =
            tokio::time::timeout(Duration::from_millis(50), self.rx.recv()).await
        {
            frames.push(frame);
        }
        frames
    }

    async fn join(&mut self, room_id: &RoomId, nickname: &str) -> ServerMessage {
        self.send(ClientMessage::Join {
            room_id: room_id.clone(),
            nickname: nickname.to_string(),
        })
        .await;
        self.next().await
    }
}

fn test_registry(config: &Config) -> RoomRegistryHandle {
    let store = InMemoryQuestionStore::new().with_list(
        "algorithms",
        vec![
            "What is a heap?".to_string(),
            "Explain quicksort".to_string(),
            "What is amortized analysis?".to_string(),
        ],
    );
    RoomRegistryHandle::new(config, Arc::new(store), ActorMetrics::new())
}

async fn create_room(client: &mut TestClient, max_participants: Option<usize>) -> RoomId {
    client
        .send(ClientMessage::CreateRoom {
            title: "Algorithms".to_string(),
            category: "cs".to_string(),
            visibility: Visibility::Public,
            max_participants,
            question_list_id: "algorithms".to_string(),
        })
        .await;
    match client.next().await {
        ServerMessage::RoomCreated { room_id } => room_id,
        other => panic!("expected room_created, got {other:?}"),
    }
}

/// Create a room and join `count` clients (the first is the creator/host).
async fn populated_room(registry: &RoomRegistryHandle, count: usize) -> (RoomId, Vec<TestClient>) {
    let mut clients: Vec<TestClient> = (0..count).map(|_| TestClient::connect(registry)).collect();
    let room_id = create_room(&mut clients[0], None).await;

    for (i, client) in clients.iter_mut().enumerate() {
        let ack = client.join(&room_id, &format!("user-{i}")).await;
        assert!(matches!(ack, ServerMessage::Joined { .. }), "got {ack:?}");
    }
    for client in &mut clients {
        client.drain().await;
    }
    (room_id, clients)
}

// ============================================================================
// Admission
// ============================================================================

#[tokio::test]
async fn test_first_joiner_is_host_and_later_joiners_see_roster() {
    let registry = test_registry(&Config::default());
    let mut host = TestClient::connect(&registry);
    let room_id = create_room(&mut host, None).await;

    match host.join(&room_id, "ann").await {
        ServerMessage::Joined {
            self_id,
            room,
            participants,
        } => {
            assert_eq!(self_id, host.id());
            assert_eq!(room.host.socket_id, host.id());
            assert!(room.host.is_host);
            assert_eq!(room.question_list_contents.len(), 3);
            assert!(participants.is_empty());
        }
        other => panic!("unexpected {other:?}"),
    }

    let mut guest = TestClient::connect(&registry);
    match guest.join(&room_id, "bob").await {
        ServerMessage::Joined { participants, .. } => {
            assert_eq!(participants.len(), 1);
            assert_eq!(participants[0].socket_id, host.id());
        }
        other => panic!("unexpected {other:?}"),
    }

    match host.next().await {
        ServerMessage::ParticipantJoined { participant } => {
            assert_eq!(participant.socket_id, guest.id());
            assert_eq!(participant.nickname, "bob");
            assert!(!participant.is_host);
        }
        other => panic!("unexpected {other:?}"),
    }

    registry.cancel();
}

#[tokio::test]
async fn test_fifth_joiner_rejected_from_full_room() {
    let registry = test_registry(&Config::default());
    let (room_id, mut members) = populated_room(&registry, 4).await;

    let mut late = TestClient::connect(&registry);
    assert!(matches!(late.join(&room_id, "eve").await, ServerMessage::RoomFull));
    assert!(late.session.room_id().is_none());

    // Existing members see nothing of the rejected join
    for member in &mut members {
        assert!(member.drain().await.is_empty());
    }

    let state = registry
        .get_room(room_id)
        .await
        .unwrap()
        .get_state()
        .await
        .unwrap();
    assert_eq!(state.participants.len(), 4);

    registry.cancel();
}

#[tokio::test]
async fn test_join_rejected_while_in_progress() {
    let registry = test_registry(&Config::default());
    let (room_id, mut members) = populated_room(&registry, 2).await;

    members[0].send(ClientMessage::Start).await;
    members[0].drain().await;

    let mut late = TestClient::connect(&registry);
    assert!(matches!(
        late.join(&room_id, "eve").await,
        ServerMessage::RoomInProgress
    ));

    registry.cancel();
}

#[tokio::test]
async fn test_join_allowed_in_progress_when_not_barred() {
    let config = Config {
        bar_joins_in_progress: false,
        ..Config::default()
    };
    let registry = test_registry(&config);
    let (room_id, mut members) = populated_room(&registry, 2).await;

    members[0].send(ClientMessage::Start).await;

    let mut late = TestClient::connect(&registry);
    match late.join(&room_id, "eve").await {
        ServerMessage::Joined { room, .. } => assert!(room.in_progress),
        other => panic!("unexpected {other:?}"),
    }

    registry.cancel();
}

#[tokio::test]
async fn test_create_room_rejects_unknown_question_list() {
    let registry = test_registry(&Config::default());
    let mut client = TestClient::connect(&registry);

    client
        .send(ClientMessage::CreateRoom {
            title: "Algorithms".to_string(),
            category: "cs".to_string(),
            visibility: Visibility::Public,
            max_participants: None,
            question_list_id: "missing".to_string(),
        })
        .await;

    match client.next().await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::InvalidRequest),
        other => panic!("unexpected {other:?}"),
    }

    registry.cancel();
}

#[tokio::test]
async fn test_list_rooms_hides_private_rooms() {
    let registry = test_registry(&Config::default());
    let mut client = TestClient::connect(&registry);
    let public_id = create_room(&mut client, Some(2)).await;

    client
        .send(ClientMessage::CreateRoom {
            title: "Secret".to_string(),
            category: "cs".to_string(),
            visibility: Visibility::Private,
            max_participants: None,
            question_list_id: "algorithms".to_string(),
        })
        .await;
    assert!(matches!(client.next().await, ServerMessage::RoomCreated { .. }));

    client.send(ClientMessage::ListRooms).await;
    match client.next().await {
        ServerMessage::RoomList { rooms } => {
            assert_eq!(rooms.len(), 1);
            assert_eq!(rooms[0].id, public_id);
            assert_eq!(rooms[0].max_participants, 2);
        }
        other => panic!("unexpected {other:?}"),
    }

    registry.cancel();
}

// ============================================================================
// Host re-election
// ============================================================================

#[tokio::test]
async fn test_host_departure_elects_earliest_joiner_before_quit() {
    let registry = test_registry(&Config::default());
    let (room_id, mut clients) = populated_room(&registry, 3).await;
    let old_host = clients[0].id();
    let expected_host = clients[1].id();

    clients[0].send(ClientMessage::Leave).await;

    for client in clients.iter_mut().skip(1) {
        let frames = client.drain().await;
        assert_eq!(frames.len(), 2, "got {frames:?}");
        match &frames[0] {
            ServerMessage::ChangeHost { socket_id, nickname } => {
                assert_eq!(socket_id, &expected_host);
                assert_eq!(nickname, "user-1");
            }
            other => panic!("expected change_host first, got {other:?}"),
        }
        match &frames[1] {
            ServerMessage::Quit { socket_id } => assert_eq!(socket_id, &old_host),
            other => panic!("expected quit second, got {other:?}"),
        }
    }

    let state = registry
        .get_room(room_id)
        .await
        .unwrap()
        .get_state()
        .await
        .unwrap();
    assert_eq!(state.host, Some(expected_host));
    assert_eq!(state.participants.iter().filter(|p| p.is_host).count(), 1);

    registry.cancel();
}

#[tokio::test]
async fn test_guest_departure_sends_only_quit() {
    let registry = test_registry(&Config::default());
    let (_room_id, mut clients) = populated_room(&registry, 2).await;
    let guest_id = clients[1].id();

    let guest = clients.pop().unwrap();
    guest.session.disconnect().await;

    let frames = clients[0].drain().await;
    assert_eq!(frames.len(), 1);
    assert!(matches!(&frames[0], ServerMessage::Quit { socket_id } if socket_id == &guest_id));

    registry.cancel();
}

// ============================================================================
// Signal relay
// ============================================================================

#[tokio::test]
async fn test_offer_relayed_only_to_target_with_sender_identity() {
    let registry = test_registry(&Config::default());
    let (_room_id, mut clients) = populated_room(&registry, 3).await;
    let target = clients[1].id();
    let sender = clients[0].id();

    clients[0]
        .send(ClientMessage::Offer {
            target_id: target,
            description: SessionDescription::offer("v=0 offer"),
        })
        .await;

    match clients[1].next().await {
        ServerMessage::Offer {
            sender_id,
            sender_nickname,
            description,
        } => {
            assert_eq!(sender_id, sender);
            assert_eq!(sender_nickname, "user-0");
            assert_eq!(description.sdp, "v=0 offer");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(clients[2].drain().await.is_empty());
    assert!(clients[0].drain().await.is_empty());

    registry.cancel();
}

#[tokio::test]
async fn test_candidate_for_unknown_target_dropped() {
    let registry = test_registry(&Config::default());
    let (_room_id, mut clients) = populated_room(&registry, 2).await;

    clients[0]
        .send(ClientMessage::Candidate {
            target_id: SocketId::from("nobody"),
            candidate: IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host"),
        })
        .await;

    for client in &mut clients {
        assert!(client.drain().await.is_empty());
    }

    registry.cancel();
}

// ============================================================================
// Study progress and index
// ============================================================================

#[tokio::test]
async fn test_non_host_start_rejected_to_requester_only() {
    let registry = test_registry(&Config::default());
    let (_room_id, mut clients) = populated_room(&registry, 2).await;

    clients[1].send(ClientMessage::Start).await;

    match clients[1].next().await {
        ServerMessage::Start {
            status,
            in_progress,
        } => {
            assert_eq!(status, ProgressStatus::Failure);
            assert!(!in_progress);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(clients[0].drain().await.is_empty());

    clients[0].send(ClientMessage::Start).await;
    for client in &mut clients {
        match client.next().await {
            ServerMessage::Start {
                status,
                in_progress,
            } => {
                assert_eq!(status, ProgressStatus::Success);
                assert!(in_progress);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    registry.cancel();
}

#[tokio::test]
async fn test_index_moves_broadcast_and_rejections_unicast() {
    let registry = test_registry(&Config::default());
    let (_room_id, mut clients) = populated_room(&registry, 2).await;

    clients[0].send(ClientMessage::Next).await;
    for client in &mut clients {
        assert!(matches!(
            client.next().await,
            ServerMessage::Next { current_index: 1 }
        ));
    }

    // Non-host intent is rejected to the requester only
    clients[1].send(ClientMessage::Next).await;
    assert!(matches!(
        clients[1].next().await,
        ServerMessage::Next { current_index: -1 }
    ));
    assert!(clients[0].drain().await.is_empty());

    // Out of range move is rejected
    clients[0].send(ClientMessage::Move { index: 7 }).await;
    assert!(matches!(
        clients[0].next().await,
        ServerMessage::Index { current_index: -1 }
    ));

    clients[0].send(ClientMessage::Move { index: 2 }).await;
    for client in &mut clients {
        assert!(matches!(
            client.next().await,
            ServerMessage::Index { current_index: 2 }
        ));
    }

    // Next at the last question is rejected
    clients[0].send(ClientMessage::Next).await;
    assert!(matches!(
        clients[0].next().await,
        ServerMessage::Next { current_index: -1 }
    ));

    clients[0].send(ClientMessage::Prev).await;
    for client in &mut clients {
        assert!(matches!(
            client.next().await,
            ServerMessage::Index { current_index: 1 }
        ));
    }

    registry.cancel();
}

// ============================================================================
// Reactions and finish
// ============================================================================

#[tokio::test]
async fn test_reaction_broadcast_includes_sender() {
    let registry = test_registry(&Config::default());
    let (_room_id, mut clients) = populated_room(&registry, 3).await;
    let reactor = clients[2].id();

    clients[2]
        .send(ClientMessage::Reaction {
            reaction_type: "clap".to_string(),
        })
        .await;

    for client in &mut clients {
        match client.next().await {
            ServerMessage::Reaction {
                socket_id,
                reaction_type,
            } => {
                assert_eq!(socket_id, reactor);
                assert_eq!(reaction_type, "clap");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    registry.cancel();
}

#[tokio::test]
async fn test_host_finish_closes_room() {
    let registry = test_registry(&Config::default());
    let (room_id, mut clients) = populated_room(&registry, 2).await;

    clients[1].send(ClientMessage::Finish).await;
    match clients[1].next().await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::Forbidden),
        other => panic!("unexpected {other:?}"),
    }

    clients[0].send(ClientMessage::Finish).await;
    for client in &mut clients {
        assert!(matches!(client.next().await, ServerMessage::Finish));
    }

    // The registry stops resolving the room once its actor has exited
    let mut gone = false;
    for _ in 0..20 {
        if let Err(RelayError::RoomNotFound(_)) = registry.get_room(room_id.clone()).await {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(gone);

    registry.cancel();
}
