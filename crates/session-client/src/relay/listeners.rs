//! Scoped relay-event listeners.
//!
//! A component subscribes for the event kinds it handles and gets an
//! ordered `Subscription`. Subscriptions taken through a
//! `SubscriptionGroup` are removed together by one `dispose()`, under the
//! same lock dispatch takes, so no event is delivered to half of a group.

use crate::relay::RelayEvent;
use common::protocol::ServerMessage;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Room creation and listing replies.
    Lobby,
    /// Join ack and join rejections.
    JoinOutcome,
    /// Offer, answer and candidate relays.
    Signal,
    /// Participant joined, quit and host change.
    Roster,
    /// Start/stop and index broadcasts.
    Progress,
    Reaction,
    /// Room finished by its host.
    Finish,
    Error,
    /// Transport closed.
    Closed,
}

impl EventKind {
    /// Every kind a joined session consumes.
    pub const SESSION: &'static [EventKind] = &[
        EventKind::JoinOutcome,
        EventKind::Signal,
        EventKind::Roster,
        EventKind::Progress,
        EventKind::Reaction,
        EventKind::Finish,
        EventKind::Error,
        EventKind::Closed,
    ];

    #[must_use]
    pub fn of(event: &RelayEvent) -> Self {
        match event {
            RelayEvent::Closed => EventKind::Closed,
            RelayEvent::Message(message) => match message {
                ServerMessage::RoomCreated { .. } | ServerMessage::RoomList { .. } => {
                    EventKind::Lobby
                }
                ServerMessage::Joined { .. }
                | ServerMessage::RoomFull
                | ServerMessage::RoomInProgress
                | ServerMessage::RoomNotFound => EventKind::JoinOutcome,
                ServerMessage::Offer { .. }
                | ServerMessage::Answer { .. }
                | ServerMessage::Candidate { .. } => EventKind::Signal,
                ServerMessage::ParticipantJoined { .. }
                | ServerMessage::Quit { .. }
                | ServerMessage::ChangeHost { .. } => EventKind::Roster,
                ServerMessage::Start { .. }
                | ServerMessage::Stop { .. }
                | ServerMessage::Index { .. }
                | ServerMessage::Current { .. }
                | ServerMessage::Next { .. } => EventKind::Progress,
                ServerMessage::Reaction { .. } => EventKind::Reaction,
                ServerMessage::Finish => EventKind::Finish,
                ServerMessage::Error { .. } => EventKind::Error,
            },
        }
    }
}

struct Listener {
    kinds: HashSet<EventKind>,
    sender: mpsc::UnboundedSender<RelayEvent>,
}

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    listeners: HashMap<u64, Listener>,
}

/// Listener table shared between a transport and its subscribers.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<ListenerTable>>,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `kinds`.
    #[must_use]
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut table = self.lock();
        let id = table.next_id;
        table.next_id += 1;
        table.listeners.insert(
            id,
            Listener {
                kinds: kinds.iter().copied().collect(),
                sender,
            },
        );
        Subscription { id, receiver }
    }

    /// Deliver `event` to every matching listener. Returns the number reached.
    pub fn dispatch(&self, event: &RelayEvent) -> usize {
        let kind = EventKind::of(event);
        let mut table = self.lock();
        let mut delivered = 0;
        let mut gone = Vec::new();

        for (id, listener) in &table.listeners {
            if !listener.kinds.contains(&kind) {
                continue;
            }
            if listener.sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                gone.push(*id);
            }
        }

        // Receivers dropped without dispose
        for id in gone {
            table.listeners.remove(&id);
        }

        delivered
    }

    /// Remove a set of listeners atomically. Returns how many were present.
    pub fn remove(&self, ids: &[u64]) -> usize {
        let mut table = self.lock();
        ids.iter()
            .filter(|id| table.listeners.remove(*id).is_some())
            .count()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn lock(&self) -> MutexGuard<'_, ListenerTable> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ordered stream of relay events for one listener.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<RelayEvent>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the listener was removed.
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        self.receiver.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<RelayEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Subscriptions disposed together. Dropping the group disposes it.
pub struct SubscriptionGroup {
    registry: ListenerRegistry,
    ids: Vec<u64>,
    disposed: bool,
}

impl SubscriptionGroup {
    #[must_use]
    pub fn new(registry: ListenerRegistry) -> Self {
        Self {
            registry,
            ids: Vec::new(),
            disposed: false,
        }
    }

    /// Subscribe through the group.
    #[must_use]
    pub fn subscribe(&mut self, kinds: &[EventKind]) -> Subscription {
        let subscription = self.registry.subscribe(kinds);
        if self.disposed {
            // A disposed group hands out subscriptions that are already closed
            self.registry.remove(&[subscription.id]);
        } else {
            self.ids.push(subscription.id);
        }
        subscription
    }

    /// Remove every listener of the group. Idempotent.
    pub fn dispose(&mut self) -> usize {
        if self.disposed {
            return 0;
        }
        self.disposed = true;
        let removed = self.registry.remove(&self.ids);
        debug!(
            target: "client.relay",
            listeners = removed,
            "Subscription group disposed"
        );
        self.ids.clear();
        removed
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Drop for SubscriptionGroup {
    fn drop(&mut self) {
        self.dispose();
    }
}
