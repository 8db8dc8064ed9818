//! Relay error types.
//!
//! Error types map to wire `ErrorCode` values for client responses.
//! Internal details are logged server-side but not exposed to clients.

use common::error::ErrorCode;
use thiserror::Error;

/// Relay service error type.
///
/// Maps to wire `ErrorCode` values:
/// - `PermissionDenied`: `FORBIDDEN` (3)
/// - `RoomNotFound`, `ParticipantNotFound`: `NOT_FOUND` (4)
/// - `Conflict`: `CONFLICT` (5)
/// - `Internal`, `Config`, `QuestionList`: `INTERNAL` (6)
/// - `RoomFull`, `RoomInProgress`, `RegistryCapacityExceeded`, `Draining`: `CAPACITY_EXCEEDED` (7)
/// - `InvalidRequest`: `INVALID_REQUEST` (8)
#[derive(Debug, Error)]
pub enum RelayError {
    /// Room not found.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Room is at its participant limit.
    #[error("Room at capacity: {0}")]
    RoomFull(String),

    /// Room's study session is running and late joins are barred.
    #[error("Room in progress: {0}")]
    RoomInProgress(String),

    /// Participant not found.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// Action requires the host role.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Conflict error (e.g., socket already in a room).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request was well-formed but semantically invalid.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Relay holds the maximum number of rooms.
    #[error("Room registry at capacity")]
    RegistryCapacityExceeded,

    /// Relay is draining (graceful shutdown).
    #[error("Relay is draining")]
    Draining,

    /// Question list store failure.
    #[error("Question list error: {0}")]
    QuestionList(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns the wire `ErrorCode` for this error.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RelayError::Internal(_) | RelayError::Config(_) | RelayError::QuestionList(_) => {
                ErrorCode::Internal
            }
            RelayError::PermissionDenied(_) => ErrorCode::Forbidden,
            RelayError::RoomNotFound(_) | RelayError::ParticipantNotFound(_) => {
                ErrorCode::NotFound
            }
            RelayError::Conflict(_) => ErrorCode::Conflict,
            RelayError::RoomFull(_)
            | RelayError::RoomInProgress(_)
            | RelayError::RegistryCapacityExceeded
            | RelayError::Draining => ErrorCode::CapacityExceeded,
            RelayError::InvalidRequest(_) => ErrorCode::InvalidRequest,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Internal(_) | RelayError::Config(_) | RelayError::QuestionList(_) => {
                "An internal error occurred".to_string()
            }
            RelayError::RoomNotFound(_) => "Room not found".to_string(),
            RelayError::RoomFull(_) => "Room is full".to_string(),
            RelayError::RoomInProgress(_) => "Study session already in progress".to_string(),
            RelayError::ParticipantNotFound(_) => "Participant not found".to_string(),
            RelayError::RegistryCapacityExceeded => {
                "Server is at capacity, please try again".to_string()
            }
            RelayError::Draining => "Server is shutting down, please reconnect".to_string(),
            RelayError::PermissionDenied(msg)
            | RelayError::Conflict(msg)
            | RelayError::InvalidRequest(msg) => msg.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        // Internal errors
        assert_eq!(
            RelayError::Internal("boom".to_string()).error_code(),
            ErrorCode::Internal
        );
        assert_eq!(
            RelayError::QuestionList("io".to_string()).error_code(),
            ErrorCode::Internal
        );

        // Forbidden
        assert_eq!(
            RelayError::PermissionDenied("not host".to_string()).error_code(),
            ErrorCode::Forbidden
        );

        // Not found
        assert_eq!(
            RelayError::RoomNotFound("room-1".to_string()).error_code(),
            ErrorCode::NotFound
        );

        // Conflict
        assert_eq!(
            RelayError::Conflict("already joined".to_string()).error_code(),
            ErrorCode::Conflict
        );

        // Capacity
        assert_eq!(
            RelayError::RoomFull("room-1".to_string()).error_code(),
            ErrorCode::CapacityExceeded
        );
        assert_eq!(
            RelayError::RoomInProgress("room-1".to_string()).error_code(),
            ErrorCode::CapacityExceeded
        );
        assert_eq!(
            RelayError::RegistryCapacityExceeded.error_code(),
            ErrorCode::CapacityExceeded
        );
        assert_eq!(RelayError::Draining.error_code(), ErrorCode::CapacityExceeded);

        assert_eq!(
            RelayError::InvalidRequest("empty list".to_string()).error_code(),
            ErrorCode::InvalidRequest
        );
    }

    #[test]
    fn test_client_message_hides_internal_details() {
        let err = RelayError::Internal("channel send failed: closed".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = RelayError::QuestionList("/etc/lists.json missing".to_string());
        assert!(!err.client_message().contains("/etc"));

        let err = RelayError::RoomNotFound("room-secret-id".to_string());
        assert!(!err.client_message().contains("room-secret-id"));
    }

    #[test]
    fn test_client_message_passes_through_user_facing_text() {
        let err = RelayError::PermissionDenied("Only the host can finish the room".to_string());
        assert_eq!(err.client_message(), "Only the host can finish the room");
    }

    #[test]
    fn test_display() {
        let err = RelayError::RoomFull("room-9".to_string());
        assert_eq!(err.to_string(), "Room at capacity: room-9");
    }
}
