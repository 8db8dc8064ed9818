//! Study progress synchronizer.
//!
//! Holds the shared question index and in-progress flag. Intents are sent
//! to the relay and never touch this state; only broadcasts do. A negative
//! index in a broadcast is the relay rejecting this client's intent.

use common::protocol::ProgressStatus;
use tracing::{debug, info};

/// Which progress broadcast was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressAction {
    Start,
    Stop,
}

/// Outcome of applying a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressUpdate {
    IndexAdopted { current_index: usize },
    IndexRejected,
    ProgressChanged { in_progress: bool },
    ProgressRejected { action: ProgressAction },
}

#[derive(Debug, Clone)]
pub struct ProgressState {
    current_index: usize,
    in_progress: bool,
    questions: Vec<String>,
}

impl ProgressState {
    /// Seed from join metadata. The index is clamped into range.
    #[must_use]
    pub fn new(questions: Vec<String>, current_index: usize, in_progress: bool) -> Self {
        let mut state = Self {
            current_index: 0,
            in_progress,
            questions,
        };
        state.current_index = current_index.min(state.max_index());
        state
    }

    /// Last valid index (0 for an empty list).
    #[must_use]
    pub fn max_index(&self) -> usize {
        self.questions.len().saturating_sub(1)
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&str> {
        self.questions.get(self.current_index).map(String::as_str)
    }

    #[must_use]
    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    /// Apply an index broadcast (`index`, `current` or `next`).
    pub fn apply_index(&mut self, value: i64) -> ProgressUpdate {
        let Ok(requested) = usize::try_from(value) else {
            debug!(
                target: "client.progress",
                value = value,
                "Index intent rejected by relay"
            );
            return ProgressUpdate::IndexRejected;
        };

        self.current_index = requested.min(self.max_index());
        debug!(
            target: "client.progress",
            current_index = self.current_index,
            "Index adopted"
        );
        ProgressUpdate::IndexAdopted {
            current_index: self.current_index,
        }
    }

    /// Apply a start/stop broadcast.
    pub fn apply_progress(
        &mut self,
        action: ProgressAction,
        status: ProgressStatus,
        in_progress: bool,
    ) -> ProgressUpdate {
        match status {
            ProgressStatus::Success => {
                self.in_progress = in_progress;
                info!(
                    target: "client.progress",
                    in_progress = in_progress,
                    "Study progress changed"
                );
                ProgressUpdate::ProgressChanged { in_progress }
            }
            ProgressStatus::Failure => {
                debug!(
                    target: "client.progress",
                    action = ?action,
                    "Progress change rejected by relay"
                );
                ProgressUpdate::ProgressRejected { action }
            }
        }
    }
}
