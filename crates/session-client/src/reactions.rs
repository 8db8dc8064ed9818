//! Reaction broadcaster.
//!
//! One visible reaction per sender. Each reaction arms an expiry timer in a
//! `DelayQueue`; a newer reaction from the same sender resets that timer
//! rather than adding another, so a burst yields exactly one clear.

use crate::config::MAX_DURATION_MS;
use common::types::SocketId;
use std::collections::HashMap;
use std::future::poll_fn;
use std::task::Poll;
use std::time::Duration;
use tokio_util::time::delay_queue::{DelayQueue, Key};
use tracing::debug;

struct ActiveReaction {
    key: Key,
    reaction_type: String,
}

pub struct ReactionBroadcaster {
    timeout: Duration,
    queue: DelayQueue<SocketId>,
    active: HashMap<SocketId, ActiveReaction>,
}

impl ReactionBroadcaster {
    /// Timeouts beyond [`MAX_DURATION_MS`] are capped.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout: timeout.min(Duration::from_millis(MAX_DURATION_MS)),
            queue: DelayQueue::new(),
            active: HashMap::new(),
        }
    }

    /// Show `reaction_type` for `sender`, restarting its expiry.
    pub fn record(&mut self, sender: SocketId, reaction_type: String) {
        match self.active.get_mut(&sender) {
            Some(active) => {
                self.queue.reset(&active.key, self.timeout);
                active.reaction_type = reaction_type;
            }
            None => {
                let key = self.queue.insert(sender.clone(), self.timeout);
                self.active.insert(sender, ActiveReaction { key, reaction_type });
            }
        }
    }

    /// Drop a sender's reaction early (the sender left).
    pub fn clear(&mut self, sender: &SocketId) -> bool {
        match self.active.remove(sender) {
            Some(active) => {
                self.queue.remove(&active.key);
                true
            }
            None => false,
        }
    }

    /// Wait for the next expiry. Pending forever while nothing is active,
    /// so it can sit in a `select!` unguarded.
    pub async fn next_expired(&mut self) -> SocketId {
        poll_fn(|cx| match self.queue.poll_expired(cx) {
            Poll::Ready(Some(expired)) => {
                let sender = expired.into_inner();
                self.active.remove(&sender);
                Poll::Ready(sender)
            }
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        })
        .await
    }

    #[must_use]
    pub fn get(&self, sender: &SocketId) -> Option<&str> {
        self.active.get(sender).map(|a| a.reaction_type.as_str())
    }

    /// Active reactions ordered by sender.
    #[must_use]
    pub fn active(&self) -> Vec<(SocketId, String)> {
        let mut active: Vec<(SocketId, String)> = self
            .active
            .iter()
            .map(|(sender, a)| (sender.clone(), a.reaction_type.clone()))
            .collect();
        active.sort_by(|a, b| a.0.cmp(&b.0));
        active
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.active.len()
    }

    /// Cancel every pending timer. Returns how many were cancelled.
    pub fn dispose(&mut self) -> usize {
        let cancelled = self.active.len();
        self.queue.clear();
        self.active.clear();
        debug!(
            target: "client.reactions",
            cancelled = cancelled,
            "Reaction timers cancelled"
        );
        cancelled
    }
}
