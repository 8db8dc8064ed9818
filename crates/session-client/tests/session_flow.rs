//! Session tests: join outcomes, roster/progress/reaction sync and
//! teardown, driven through a mock relay.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use common::error::ErrorCode;
use common::protocol::{ClientMessage, ProgressStatus, ServerMessage, SessionDescription};
use common::types::SocketId;
use session_client::peer::LinkState;
use session_client::progress::ProgressAction;
use session_client::{
    ClientConfig, ClientError, Identity, Notice, Session, SessionExit, SessionHandle,
    SessionSnapshot,
};
use session_test_utils::{
    participant, test_deps, test_deps_with_config, FailingMediaSource, MockConnectionFactory,
    MockRelay, TestRoom, TEST_RELAY_URL,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const SELF_ID: &str = "me";

/// Room hosted by `host` with one other guest already present.
fn busy_room() -> (TestRoom, ServerMessage) {
    let room = TestRoom::new("room-1").with_host(participant("host", "Ada", 1_000));
    let others = vec![room.host.clone(), participant("guest", "Grace", 2_000)];
    let joined = room.joined(SELF_ID, others);
    (room, joined)
}

async fn join(
    relay: &Arc<MockRelay>,
    factory: &MockConnectionFactory,
) -> (SessionHandle, JoinHandle<SessionExit>, broadcast::Receiver<Notice>) {
    let (handle, task) = Session::join(
        test_deps(relay.clone(), factory.clone()),
        Identity::new("Bob"),
        "room-1".into(),
    )
    .await
    .expect("join accepted");
    let notices = handle.notices();
    (handle, task, notices)
}

/// Poll snapshots until `predicate` holds.
async fn wait_until(
    handle: &SessionHandle,
    predicate: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let snapshot = handle.snapshot().await.unwrap();
        if predicate(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached; last snapshot: {snapshot:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Skip notices until one matches.
async fn wait_notice(
    notices: &mut broadcast::Receiver<Notice>,
    predicate: impl Fn(&Notice) -> bool,
) -> Notice {
    loop {
        let notice = tokio::time::timeout(Duration::from_secs(30), notices.recv())
            .await
            .expect("notice in time")
            .expect("notice channel open");
        if predicate(&notice) {
            return notice;
        }
    }
}

// ============================================================================
// Join outcomes
// ============================================================================

#[tokio::test]
async fn test_full_room_fails_with_capacity_and_no_links() {
    let relay = MockRelay::builder().join_reply(ServerMessage::RoomFull).build();
    let factory = MockConnectionFactory::new();

    let result = Session::join(
        test_deps(relay.clone(), factory.clone()),
        Identity::new("Bob"),
        "room-1".into(),
    )
    .await;

    assert!(matches!(result, Err(ClientError::Capacity)));
    assert_eq!(factory.created_count(), 0);
    assert_eq!(relay.sent_count("offer"), 0);
    assert_eq!(relay.listener_count(), 0);
}

#[tokio::test]
async fn test_join_rejections_map_to_errors() {
    let cases = [
        (ServerMessage::RoomInProgress, "in_progress"),
        (ServerMessage::RoomNotFound, "not_found"),
        (
            ServerMessage::Error {
                code: ErrorCode::Forbidden,
                message: "banned".to_string(),
            },
            "authorization",
        ),
        (
            ServerMessage::Error {
                code: ErrorCode::InvalidRequest,
                message: "Nickname required".to_string(),
            },
            "protocol",
        ),
    ];

    for (reply, expected) in cases {
        let relay = MockRelay::builder().join_reply(reply).build();
        let factory = MockConnectionFactory::new();
        let result = Session::join(
            test_deps(relay.clone(), factory.clone()),
            Identity::new("Bob"),
            "room-1".into(),
        )
        .await;

        let matched = match (&result, expected) {
            (Err(ClientError::InProgress), "in_progress")
            | (Err(ClientError::NotFound), "not_found")
            | (Err(ClientError::Authorization(_)), "authorization")
            | (Err(ClientError::Protocol(_)), "protocol") => true,
            _ => false,
        };
        assert!(matched, "expected {expected}, got {:?}", result.err());
        assert_eq!(factory.created_count(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_join_times_out_without_reply() {
    let relay = MockRelay::new();
    let factory = MockConnectionFactory::new();
    let mut config = ClientConfig::new(TEST_RELAY_URL);
    config.join_timeout = Duration::from_secs(2);

    let result = Session::join(
        test_deps_with_config(config, relay.clone(), factory.clone()),
        Identity::new("Bob"),
        "room-1".into(),
    )
    .await;

    assert!(matches!(result, Err(ClientError::JoinTimeout)));
    assert_eq!(relay.sent_count("join"), 1);
    assert_eq!(relay.listener_count(), 0);
}

#[tokio::test]
async fn test_media_failure_fails_before_contacting_relay() {
    let relay = MockRelay::new();
    let factory = MockConnectionFactory::new();
    let media = Arc::new(FailingMediaSource::new());
    let mut deps = test_deps(relay.clone(), factory.clone());
    deps.media = media.clone();

    let result = Session::join(deps, Identity::new("Bob"), "room-1".into()).await;

    assert!(matches!(result, Err(ClientError::Resource(_))));
    assert_eq!(media.attempts(), 1);
    assert!(relay.sent().is_empty());
    assert_eq!(relay.listener_count(), 0);
    assert_eq!(factory.created_count(), 0);
}

#[tokio::test]
async fn test_join_offers_to_every_present_member() {
    let (_room, joined) = busy_room();
    let relay = MockRelay::builder().join_reply(joined).build();
    let factory = MockConnectionFactory::new();

    let (handle, _task, _notices) = join(&relay, &factory).await;
    let snapshot = handle.snapshot().await.unwrap();

    assert_eq!(snapshot.self_id, SocketId::from(SELF_ID));
    assert!(!snapshot.is_host);
    assert_eq!(snapshot.participants.len(), 3);
    assert_eq!(snapshot.links.len(), 2);
    assert!(snapshot.links.iter().all(|l| l.is_offerer));
    assert!(snapshot
        .links
        .iter()
        .all(|l| l.state == LinkState::OfferSent));
    assert_eq!(relay.sent_count("offer"), 2);
    assert_eq!(
        relay.sent().first(),
        Some(&ClientMessage::Join {
            room_id: "room-1".into(),
            nickname: "Bob".to_string(),
        })
    );
}

#[tokio::test]
async fn test_join_seeds_progress_from_ack() {
    let room = TestRoom::new("room-1").started().at_index(2);
    let joined = room.joined(SELF_ID, vec![room.host.clone()]);
    let relay = MockRelay::builder().join_reply(joined).build();
    let factory = MockConnectionFactory::new();

    let (handle, _task, _notices) = join(&relay, &factory).await;
    let snapshot = handle.snapshot().await.unwrap();

    assert!(snapshot.in_progress);
    assert_eq!(snapshot.current_index, 2);
    assert_eq!(
        snapshot.current_question.as_deref(),
        Some("Reverse a linked list")
    );
}

// ============================================================================
// Mesh membership
// ============================================================================

#[tokio::test]
async fn test_newcomer_offers_and_we_answer() {
    let (_room, joined) = busy_room();
    let relay = MockRelay::builder().join_reply(joined).build();
    let factory = MockConnectionFactory::new();
    let (handle, _task, mut notices) = join(&relay, &factory).await;

    relay.deliver(ServerMessage::ParticipantJoined {
        participant: participant("late", "Linus", 3_000),
    });
    wait_notice(&mut notices, |n| {
        matches!(n, Notice::ParticipantJoined { nickname, .. } if nickname == "Linus")
    })
    .await;

    // Announcement alone creates no link
    assert_eq!(factory.created_count(), 2);

    relay.deliver(ServerMessage::Offer {
        sender_id: "late".into(),
        sender_nickname: "Linus".to_string(),
        description: SessionDescription::offer("late-offer"),
    });
    let snapshot = wait_until(&handle, |s| s.links.len() == 3).await;

    let link = snapshot
        .links
        .iter()
        .find(|l| l.peer_id == SocketId::from("late"))
        .unwrap();
    assert!(!link.is_offerer);
    relay.wait_for_sent("answer", 1).await;
    assert_eq!(snapshot.participants.len(), 4);
}

#[tokio::test]
async fn test_quit_closes_link_and_clears_reaction() {
    let (_room, joined) = busy_room();
    let relay = MockRelay::builder().join_reply(joined).build();
    let factory = MockConnectionFactory::new();
    let (handle, _task, mut notices) = join(&relay, &factory).await;

    relay.deliver(ServerMessage::Reaction {
        socket_id: "guest".into(),
        reaction_type: "thumbs_up".to_string(),
    });
    wait_until(&handle, |s| !s.reactions.is_empty()).await;

    relay.deliver(ServerMessage::Quit {
        socket_id: "guest".into(),
    });
    wait_notice(&mut notices, |n| matches!(n, Notice::ParticipantLeft { .. })).await;

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.participants.len(), 2);
    assert_eq!(snapshot.links.len(), 1);
    assert!(snapshot.reactions.is_empty());

    let probe = factory.probe(&"guest".into()).unwrap();
    assert!(probe.is_detached());
    assert!(probe.is_closed());
}

// ============================================================================
// Host re-election
// ============================================================================

#[tokio::test]
async fn test_host_handover_to_local_participant() {
    let room = TestRoom::new("room-1").with_host(participant("host", "Ada", 1_000));
    let joined = room.joined(SELF_ID, vec![room.host.clone()]);
    let relay = MockRelay::builder().join_reply(joined).build();
    let factory = MockConnectionFactory::new();
    let (handle, _task, mut notices) = join(&relay, &factory).await;

    relay.deliver(ServerMessage::ChangeHost {
        socket_id: SELF_ID.into(),
        nickname: "Bob".to_string(),
    });
    relay.deliver(ServerMessage::Quit {
        socket_id: "host".into(),
    });

    let notice = wait_notice(&mut notices, |n| matches!(n, Notice::HostChanged { .. })).await;
    assert_eq!(
        notice,
        Notice::HostChanged {
            socket_id: SELF_ID.into(),
            nickname: "Bob".to_string(),
            is_local: true,
        }
    );

    let snapshot = wait_until(&handle, |s| s.participants.len() == 1).await;
    assert!(snapshot.is_host);
    assert_eq!(snapshot.participants.iter().filter(|p| p.is_host).count(), 1);
    assert!(snapshot.links.is_empty());
}

#[tokio::test]
async fn test_host_handover_to_remote_participant() {
    let (_room, joined) = busy_room();
    let relay = MockRelay::builder().join_reply(joined).build();
    let factory = MockConnectionFactory::new();
    let (handle, _task, mut notices) = join(&relay, &factory).await;

    relay.deliver(ServerMessage::ChangeHost {
        socket_id: "guest".into(),
        nickname: "Grace".to_string(),
    });
    let notice = wait_notice(&mut notices, |n| matches!(n, Notice::HostChanged { .. })).await;
    assert!(matches!(notice, Notice::HostChanged { is_local: false, .. }));

    let snapshot = handle.snapshot().await.unwrap();
    assert!(!snapshot.is_host);
    let hosts: Vec<_> = snapshot.participants.iter().filter(|p| p.is_host).collect();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].socket_id, SocketId::from("guest"));
}

// ============================================================================
// Study progress
// ============================================================================

#[tokio::test]
async fn test_rejected_intents_leave_progress_unchanged() {
    let (_room, joined) = busy_room();
    let relay = MockRelay::builder().join_reply(joined).build();
    let factory = MockConnectionFactory::new();
    let (handle, _task, mut notices) = join(&relay, &factory).await;

    handle.next().await.unwrap();
    relay.wait_for_sent("next", 1).await;
    relay.deliver(ServerMessage::Next { current_index: -1 });
    assert_eq!(
        wait_notice(&mut notices, |n| matches!(n, Notice::IndexRejected)).await,
        Notice::IndexRejected
    );

    handle.start().await.unwrap();
    relay.wait_for_sent("start", 1).await;
    relay.deliver(ServerMessage::Start {
        status: ProgressStatus::Failure,
        in_progress: false,
    });
    assert_eq!(
        wait_notice(&mut notices, |n| matches!(n, Notice::ProgressRejected { .. })).await,
        Notice::ProgressRejected {
            action: ProgressAction::Start
        }
    );

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.current_index, 0);
    assert!(!snapshot.in_progress);
}

#[tokio::test]
async fn test_index_and_progress_broadcasts_are_adopted() {
    let (_room, joined) = busy_room();
    let relay = MockRelay::builder().join_reply(joined).build();
    let factory = MockConnectionFactory::new();
    let (handle, _task, _notices) = join(&relay, &factory).await;

    relay.deliver(ServerMessage::Start {
        status: ProgressStatus::Success,
        in_progress: true,
    });
    relay.deliver(ServerMessage::Next { current_index: 1 });
    let snapshot = wait_until(&handle, |s| s.current_index == 1).await;
    assert!(snapshot.in_progress);
    assert_eq!(
        snapshot.current_question.as_deref(),
        Some("Design a rate limiter")
    );

    // Past the end clamps to the last question
    relay.deliver(ServerMessage::Index { current_index: 9 });
    wait_until(&handle, |s| s.current_index == 2).await;

    relay.deliver(ServerMessage::Stop {
        status: ProgressStatus::Success,
        in_progress: false,
    });
    wait_until(&handle, |s| !s.in_progress).await;
}

#[tokio::test]
async fn test_intents_are_forwarded_to_relay() {
    let (_room, joined) = busy_room();
    let relay = MockRelay::builder().join_reply(joined).build();
    let factory = MockConnectionFactory::new();
    let (handle, _task, _notices) = join(&relay, &factory).await;

    handle.move_to(2).await.unwrap();
    handle.prev().await.unwrap();
    handle.set_current().await.unwrap();
    handle.stop().await.unwrap();
    relay.wait_for_sent("stop", 1).await;

    let intents: Vec<ClientMessage> = relay
        .sent()
        .into_iter()
        .filter(|m| !matches!(m, ClientMessage::Join { .. } | ClientMessage::Offer { .. }))
        .collect();
    assert_eq!(
        intents,
        vec![
            ClientMessage::Move { index: 2 },
            ClientMessage::Prev,
            ClientMessage::Current,
            ClientMessage::Stop,
        ]
    );
}

// ============================================================================
// Reactions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reaction_expires_after_timeout() {
    let (_room, joined) = busy_room();
    let relay = MockRelay::builder().join_reply(joined).build();
    let factory = MockConnectionFactory::new();
    let (handle, _task, mut notices) = join(&relay, &factory).await;

    handle.react("clap").await.unwrap();
    relay.wait_for_sent("reaction", 1).await;
    assert_eq!(
        relay.last_sent(),
        Some(ClientMessage::Reaction {
            reaction_type: "clap".to_string()
        })
    );

    // Shown once the relay echoes it
    relay.deliver(ServerMessage::Reaction {
        socket_id: SELF_ID.into(),
        reaction_type: "clap".to_string(),
    });
    let snapshot = wait_until(&handle, |s| !s.reactions.is_empty()).await;
    assert_eq!(
        snapshot.reactions,
        vec![(SocketId::from(SELF_ID), "clap".to_string())]
    );

    let started = tokio::time::Instant::now();
    let cleared = wait_notice(&mut notices, |n| matches!(n, Notice::ReactionCleared { .. })).await;
    assert_eq!(
        cleared,
        Notice::ReactionCleared {
            socket_id: SELF_ID.into()
        }
    );
    assert!(started.elapsed() <= Duration::from_secs(3));
    assert!(handle.snapshot().await.unwrap().reactions.is_empty());
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_leave_tears_down_before_sending_leave() {
    let (_room, joined) = busy_room();
    let relay = MockRelay::builder().join_reply(joined).build();
    let factory = MockConnectionFactory::new();

    // (listeners registered, leaves sent) observed at each close
    let observed = Arc::new(Mutex::new(Vec::new()));
    {
        let relay = relay.clone();
        let observed = observed.clone();
        factory.on_close(Arc::new(move |_peer: &SocketId| {
            observed
                .lock()
                .unwrap()
                .push((relay.listener_count(), relay.sent_count("leave")));
        }));
    }

    let (handle, task, _notices) = join(&relay, &factory).await;
    relay.deliver(ServerMessage::Reaction {
        socket_id: "host".into(),
        reaction_type: "wave".to_string(),
    });
    wait_until(&handle, |s| !s.reactions.is_empty()).await;

    handle.leave().await.unwrap();

    let observed = observed.lock().unwrap().clone();
    assert_eq!(observed.len(), 2);
    assert!(observed
        .iter()
        .all(|(listeners, leaves)| *listeners > 0 && *leaves == 0));

    assert_eq!(relay.last_sent(), Some(ClientMessage::Leave));
    assert_eq!(relay.sent_count("leave"), 1);
    assert_eq!(relay.listener_count(), 0);
    for probe in factory.probes() {
        assert!(probe.is_detached());
        assert!(probe.is_closed());
    }

    assert_eq!(task.await.unwrap(), SessionExit::Left);
    assert!(handle.snapshot().await.is_err());
}

#[tokio::test]
async fn test_finish_ends_session_without_leave() {
    let (_room, joined) = busy_room();
    let relay = MockRelay::builder().join_reply(joined).build();
    let factory = MockConnectionFactory::new();
    let (handle, task, mut notices) = join(&relay, &factory).await;

    handle.finish().await.unwrap();
    relay.wait_for_sent("finish", 1).await;
    relay.deliver(ServerMessage::Finish);

    assert_eq!(task.await.unwrap(), SessionExit::Finished);
    assert_eq!(
        wait_notice(&mut notices, |n| matches!(n, Notice::Finished)).await,
        Notice::Finished
    );
    assert_eq!(relay.sent_count("leave"), 0);
    assert_eq!(relay.listener_count(), 0);
    assert!(factory.probes().iter().all(|p| p.is_closed()));
}

#[tokio::test]
async fn test_relay_loss_and_cancel_end_session() {
    let (_room, joined) = busy_room();
    let relay = MockRelay::builder().join_reply(joined.clone()).build();
    let factory = MockConnectionFactory::new();
    let (_handle, task, _notices) = join(&relay, &factory).await;

    relay.close();
    assert_eq!(task.await.unwrap(), SessionExit::RelayClosed);

    let relay = MockRelay::builder().join_reply(joined).build();
    let factory = MockConnectionFactory::new();
    let (handle, task, _notices) = join(&relay, &factory).await;

    handle.cancel();
    assert_eq!(task.await.unwrap(), SessionExit::Cancelled);
    assert_eq!(relay.sent_count("leave"), 0);
    assert!(factory.probes().iter().all(|p| p.is_closed()));
}

// ============================================================================
// Negotiation stalls
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stalled_negotiation_gives_up_after_budget() {
    let room = TestRoom::new("room-1");
    let joined = room.joined(SELF_ID, vec![room.host.clone()]);
    let relay = MockRelay::builder().join_reply(joined).build();
    let factory = MockConnectionFactory::builder().manual_connect().build();

    let mut config = ClientConfig::new(TEST_RELAY_URL);
    config.negotiation_stall_timeout = Duration::from_secs(5);
    config.stall_check_interval = Duration::from_secs(1);
    config.max_renegotiation_attempts = 2;

    let (handle, _task) = Session::join(
        test_deps_with_config(config, relay.clone(), factory.clone()),
        Identity::new("Bob"),
        "room-1".into(),
    )
    .await
    .unwrap();
    let mut notices = handle.notices();

    let stalled = wait_notice(&mut notices, |n| {
        matches!(n, Notice::NegotiationStalled { .. })
    })
    .await;
    assert_eq!(
        stalled,
        Notice::NegotiationStalled {
            peer_id: "host".into(),
            attempts: 2
        }
    );

    // No further restarts once the budget is spent
    tokio::time::sleep(Duration::from_secs(30)).await;
    let probe = factory.probe(&"host".into()).unwrap();
    assert_eq!(probe.offers_created(), 3);
    assert_eq!(probe.ice_restarts(), 2);

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.links[0].renegotiation_attempts, 2);
    assert_eq!(snapshot.links[0].state, LinkState::OfferSent);
}
