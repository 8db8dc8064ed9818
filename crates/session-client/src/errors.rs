//! Client error types.
//!
//! Join-time failures (`Capacity`, `InProgress`, `NotFound`, `Resource`,
//! `JoinTimeout`) are returned from `Session::join`. Negotiation failures
//! stay scoped to one peer link and never end the session.

use common::error::ProtocolError;
use common::types::SocketId;
use thiserror::Error;

/// Failure applying a description or candidate to one media connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("Invalid signaling state: {0}")]
    InvalidState(String),

    #[error("Session description rejected: {0}")]
    Description(String),

    #[error("ICE candidate rejected: {0}")]
    Candidate(String),

    #[error("Media backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Room is full")]
    Capacity,

    #[error("Study session already in progress")]
    InProgress,

    #[error("Room not found")]
    NotFound,

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Negotiation with {peer_id} failed: {source}")]
    Negotiation {
        peer_id: SocketId,
        #[source]
        source: NegotiationError,
    },

    #[error("Local media unavailable: {0}")]
    Resource(String),

    #[error("Relay transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out waiting for join response")]
    JoinTimeout,

    #[error("Session closed")]
    Closed,
}

impl ClientError {
    /// Negotiation failure scoped to `peer_id`.
    #[must_use]
    pub fn negotiation(peer_id: &SocketId, source: NegotiationError) -> Self {
        ClientError::Negotiation {
            peer_id: peer_id.clone(),
            source,
        }
    }

    /// True for outcomes that end a join attempt and send the user elsewhere.
    #[must_use]
    pub fn is_terminal_join_outcome(&self) -> bool {
        matches!(
            self,
            ClientError::Capacity
                | ClientError::InProgress
                | ClientError::NotFound
                | ClientError::Resource(_)
                | ClientError::JoinTimeout
        )
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}
