//! Local capture and remote media handles.
//!
//! Capture devices are an external collaborator: the session only needs a
//! set of local tracks to attach to every peer connection, and a place to
//! put the remote stream each connection reports.

use crate::errors::ClientError;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

impl MediaTrack {
    #[must_use]
    pub fn audio(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Audio,
        }
    }

    #[must_use]
    pub fn video(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Video,
        }
    }
}

/// Tracks captured on this device, attached to every peer link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalMedia {
    pub stream_id: String,
    pub tracks: Vec<MediaTrack>,
}

impl LocalMedia {
    #[must_use]
    pub fn new(stream_id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks,
        }
    }

    /// One audio and one video track.
    #[must_use]
    pub fn camera_and_microphone() -> Self {
        Self::new(
            "local",
            vec![MediaTrack::audio("mic"), MediaTrack::video("camera")],
        )
    }
}

/// The stream a peer is sending us. A newer report replaces the old one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub stream_id: String,
    pub tracks: Vec<MediaTrack>,
}

/// Provider of local capture tracks.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire capture devices. Failure is reported as `ClientError::Resource`.
    async fn acquire(&self) -> Result<LocalMedia, ClientError>;
}

/// Media source returning a fixed set of tracks (headless clients).
#[derive(Debug, Clone)]
pub struct StaticMediaSource {
    media: LocalMedia,
}

impl StaticMediaSource {
    #[must_use]
    pub fn new(media: LocalMedia) -> Self {
        Self { media }
    }
}

#[async_trait]
impl MediaSource for StaticMediaSource {
    async fn acquire(&self) -> Result<LocalMedia, ClientError> {
        if self.media.tracks.is_empty() {
            return Err(ClientError::Resource("no capture tracks".to_string()));
        }
        Ok(self.media.clone())
    }
}
