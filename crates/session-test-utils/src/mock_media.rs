//! Mock capture sources.

use async_trait::async_trait;
use session_client::media::{LocalMedia, MediaSource};
use session_client::ClientError;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Capture source whose devices are never available.
#[derive(Debug, Default)]
pub struct FailingMediaSource {
    attempts: AtomicUsize,
}

impl FailingMediaSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of acquisition attempts.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for FailingMediaSource {
    async fn acquire(&self) -> Result<LocalMedia, ClientError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ClientError::Resource("camera permission denied".to_string()))
    }
}
