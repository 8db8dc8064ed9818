//! In-memory relay transport.
//!
//! Records every message a session sends and lets the test deliver relay
//! events to the session's listeners. Optionally answers `join` with a
//! scripted reply.
//!
//! # Example
//!
//! ```rust,ignore
//! use session_test_utils::MockRelay;
//!
//! let relay = MockRelay::builder().join_reply(ServerMessage::RoomFull).build();
//! // ... Session::join(...) fails with ClientError::Capacity ...
//! assert_eq!(relay.sent_count("join"), 1);
//! ```

use async_trait::async_trait;
use common::protocol::{ClientMessage, ServerMessage};
use session_client::relay::{ListenerRegistry, RelayEvent, RelayTransport};
use session_client::ClientError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock relay transport.
#[derive(Default)]
pub struct MockRelay {
    listeners: ListenerRegistry,
    sent: Mutex<Vec<ClientMessage>>,
    join_reply: Mutex<Option<ServerMessage>>,
    closed: AtomicBool,
}

impl MockRelay {
    /// Relay that records sends and never replies on its own.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn builder() -> MockRelayBuilder {
        MockRelayBuilder::default()
    }

    /// Reply to the next `join` with `reply`.
    pub fn set_join_reply(&self, reply: ServerMessage) {
        *self.join_reply.lock().unwrap() = Some(reply);
    }

    /// Deliver a relay event to every matching listener. Returns the
    /// number of listeners reached.
    pub fn deliver(&self, message: ServerMessage) -> usize {
        self.listeners.dispatch(&RelayEvent::Message(message))
    }

    /// Simulate the relay connection dropping.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        self.listeners.dispatch(&RelayEvent::Closed)
    }

    /// Every message sent so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of sent messages with the given event name.
    #[must_use]
    pub fn sent_count(&self, event: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.event_name() == event)
            .count()
    }

    #[must_use]
    pub fn last_sent(&self) -> Option<ClientMessage> {
        self.sent.lock().unwrap().last().cloned()
    }

    /// Listeners currently registered.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.listener_count()
    }

    /// Wait until at least `count` messages named `event` were sent.
    ///
    /// # Panics
    ///
    /// Panics if they do not show up within one second.
    pub async fn wait_for_sent(&self, event: &str, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while self.sent_count(event) < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} '{event}' sends, saw {}",
                self.sent_count(event)
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl RelayTransport for MockRelay {
    async fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }

        let is_join = matches!(message, ClientMessage::Join { .. });
        self.sent.lock().unwrap().push(message);

        if is_join {
            let reply = self.join_reply.lock().unwrap().take();
            if let Some(reply) = reply {
                self.deliver(reply);
            }
        }
        Ok(())
    }

    fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }
}

/// Builder for [`MockRelay`].
#[derive(Default)]
pub struct MockRelayBuilder {
    join_reply: Option<ServerMessage>,
}

impl MockRelayBuilder {
    /// Answer `join` with `reply`.
    #[must_use]
    pub fn join_reply(mut self, reply: ServerMessage) -> Self {
        self.join_reply = Some(reply);
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<MockRelay> {
        Arc::new(MockRelay {
            join_reply: Mutex::new(self.join_reply),
            ..MockRelay::default()
        })
    }
}
