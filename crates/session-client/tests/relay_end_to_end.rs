//! Two sessions meeting through a real relay gateway over WebSocket.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use common::types::{RoomId, Visibility};
use relay_service::actors::messages::CreateRoomRequest;
use relay_service::actors::{ActorMetrics, RoomRegistryHandle};
use relay_service::config::Config;
use relay_service::gateway::gateway_router;
use relay_service::questions::InMemoryQuestionStore;
use session_client::media::{LocalMedia, StaticMediaSource};
use session_client::peer::LinkState;
use session_client::relay::WsRelay;
use session_client::{
    ClientConfig, ClientError, Identity, Notice, Session, SessionDeps, SessionHandle,
    SessionSnapshot,
};
use session_test_utils::MockConnectionFactory;
use std::sync::Arc;
use std::time::Duration;

async fn start_relay() -> (String, RoomRegistryHandle) {
    let store = InMemoryQuestionStore::new().with_list(
        "networks",
        vec![
            "What does TCP slow start do?".to_string(),
            "Explain head-of-line blocking".to_string(),
        ],
    );
    let registry =
        RoomRegistryHandle::new(&Config::default(), Arc::new(store), ActorMetrics::new());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = gateway_router(registry.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{addr}/ws"), registry)
}

async fn create_room(registry: &RoomRegistryHandle, max_participants: usize) -> RoomId {
    registry
        .create_room(CreateRoomRequest {
            title: "Networks".to_string(),
            category: "cs".to_string(),
            visibility: Visibility::Public,
            max_participants: Some(max_participants),
            question_list_id: "networks".to_string(),
        })
        .await
        .unwrap()
}

async fn join(
    url: &str,
    room_id: &RoomId,
    nickname: &str,
) -> Result<(SessionHandle, MockConnectionFactory), ClientError> {
    let factory = MockConnectionFactory::new();
    let deps = SessionDeps {
        config: ClientConfig::new(url),
        relay: WsRelay::connect(url).await?,
        media: Arc::new(StaticMediaSource::new(LocalMedia::camera_and_microphone())),
        connections: Arc::new(factory.clone()),
    };
    let (handle, _task) = Session::join(deps, Identity::new(nickname), room_id.clone()).await?;
    Ok((handle, factory))
}

async fn wait_until(
    handle: &SessionHandle,
    predicate: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = handle.snapshot().await.unwrap();
        if predicate(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached; last snapshot: {snapshot:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn all_stable(snapshot: &SessionSnapshot, expected: usize) -> bool {
    snapshot.links.len() == expected
        && snapshot
            .links
            .iter()
            .all(|l| l.state == LinkState::Stable)
}

#[tokio::test]
async fn test_two_sessions_negotiate_and_share_progress() {
    let (url, registry) = start_relay().await;
    let room_id = create_room(&registry, 4).await;

    let (host, _host_factory) = join(&url, &room_id, "Ada").await.unwrap();
    let (guest, guest_factory) = join(&url, &room_id, "Grace").await.unwrap();

    let host_view = wait_until(&host, |s| all_stable(s, 1)).await;
    let guest_view = wait_until(&guest, |s| all_stable(s, 1)).await;

    assert!(host_view.is_host);
    assert!(!guest_view.is_host);
    assert!(guest_view.links[0].is_offerer);
    assert!(!host_view.links[0].is_offerer);
    assert_eq!(guest_factory.created_count(), 1);

    host.start().await.unwrap();
    host.next().await.unwrap();
    let guest_view = wait_until(&guest, |s| s.in_progress && s.current_index == 1).await;
    assert_eq!(
        guest_view.current_question.as_deref(),
        Some("Explain head-of-line blocking")
    );

    // Guest intents are refused by the relay
    let mut guest_notices = guest.notices();
    guest.prev().await.unwrap();
    loop {
        let notice = tokio::time::timeout(Duration::from_secs(5), guest_notices.recv())
            .await
            .unwrap()
            .unwrap();
        if notice == Notice::IndexRejected {
            break;
        }
    }
    assert_eq!(host.snapshot().await.unwrap().current_index, 1);

    registry.cancel();
}

#[tokio::test]
async fn test_host_leaving_hands_over_to_guest() {
    let (url, registry) = start_relay().await;
    let room_id = create_room(&registry, 4).await;

    let (host, _host_factory) = join(&url, &room_id, "Ada").await.unwrap();
    let (guest, guest_factory) = join(&url, &room_id, "Grace").await.unwrap();
    wait_until(&guest, |s| all_stable(s, 1)).await;

    host.leave().await.unwrap();

    let guest_view = wait_until(&guest, |s| s.participants.len() == 1).await;
    assert!(guest_view.is_host);
    assert!(guest_view.links.is_empty());
    assert!(guest_factory.probes().iter().all(|p| p.is_closed()));

    registry.cancel();
}

#[tokio::test]
async fn test_join_full_room_over_websocket() {
    let (url, registry) = start_relay().await;
    let room_id = create_room(&registry, 2).await;

    let (_a, _) = join(&url, &room_id, "Ada").await.unwrap();
    let (b, b_factory) = join(&url, &room_id, "Grace").await.unwrap();
    wait_until(&b, |s| all_stable(s, 1)).await;

    let result = join(&url, &room_id, "Linus").await;
    assert!(matches!(result, Err(ClientError::Capacity)));

    // Existing members never linked to the rejected joiner
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(b.snapshot().await.unwrap().links.len(), 1);
    assert_eq!(b_factory.created_count(), 1);

    registry.cancel();
}

#[tokio::test]
async fn test_unknown_room_is_not_found() {
    let (url, registry) = start_relay().await;
    let result = join(&url, &RoomId::from("no-such-room"), "Ada").await;
    assert!(matches!(result, Err(ClientError::NotFound)));
    registry.cancel();
}
