//! Pre-configured test data for session tests.
//!
//! Provides builders for:
//! - Participants with explicit join times
//! - Rooms with a question list and progress
//! - Join acks as the relay would send them

use common::protocol::{ParticipantInfo, RoomMetadata, ServerMessage};
use common::types::{RoomId, SocketId, Visibility};
use uuid::Uuid;

/// Questions used by [`TestRoom`] unless overridden.
pub const DEFAULT_QUESTIONS: [&str; 3] = [
    "Explain two-phase commit",
    "Design a rate limiter",
    "Reverse a linked list",
];

/// A participant that is not host.
#[must_use]
pub fn participant(socket_id: &str, nickname: &str, join_time: i64) -> ParticipantInfo {
    ParticipantInfo {
        socket_id: SocketId::from(socket_id),
        nickname: nickname.to_string(),
        is_host: false,
        join_time,
    }
}

/// Test room fixture.
#[derive(Debug, Clone)]
pub struct TestRoom {
    pub id: RoomId,
    pub title: String,
    /// Host at creation time.
    pub host: ParticipantInfo,
    pub max_participants: usize,
    pub questions: Vec<String>,
    pub current_index: usize,
    pub in_progress: bool,
}

impl TestRoom {
    /// Room with a default host (`host`, "Host") and [`DEFAULT_QUESTIONS`].
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let mut host = participant("host", "Host", 1_000);
        host.is_host = true;
        Self {
            id: RoomId::from(id.into()),
            title: "Systems interview practice".to_string(),
            host,
            max_participants: 4,
            questions: DEFAULT_QUESTIONS.iter().map(ToString::to_string).collect(),
            current_index: 0,
            in_progress: false,
        }
    }

    /// Room with a random ID.
    #[must_use]
    pub fn random() -> Self {
        Self::new(format!("room-{}", Uuid::new_v4()))
    }

    #[must_use]
    pub fn with_host(mut self, mut host: ParticipantInfo) -> Self {
        host.is_host = true;
        self.host = host;
        self
    }

    #[must_use]
    pub fn with_questions(mut self, questions: &[&str]) -> Self {
        self.questions = questions.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn at_index(mut self, index: usize) -> Self {
        self.current_index = index;
        self
    }

    #[must_use]
    pub fn started(mut self) -> Self {
        self.in_progress = true;
        self
    }

    #[must_use]
    pub fn metadata(&self) -> RoomMetadata {
        RoomMetadata {
            id: self.id.clone(),
            title: self.title.clone(),
            category: "interview".to_string(),
            host: self.host.clone(),
            max_participants: self.max_participants,
            visibility: Visibility::Public,
            created_at: 1,
            in_progress: self.in_progress,
            question_list_id: "systems".to_string(),
            question_list_contents: self.questions.clone(),
            current_index: self.current_index,
        }
    }

    /// Join ack for `self_id`. `others` are the members already present,
    /// host included.
    #[must_use]
    pub fn joined(&self, self_id: &str, others: Vec<ParticipantInfo>) -> ServerMessage {
        ServerMessage::Joined {
            self_id: SocketId::from(self_id),
            room: self.metadata(),
            participants: others,
        }
    }
}
