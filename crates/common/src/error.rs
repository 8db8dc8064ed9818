//! Common error types for Study Room components.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error codes carried in relay `error` events.
///
/// Numeric values are stable and shared by every component:
/// - `Unauthorized` (2)
/// - `Forbidden` (3)
/// - `NotFound` (4)
/// - `Conflict` (5)
/// - `Internal` (6)
/// - `CapacityExceeded` (7)
/// - `InvalidRequest` (8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
    CapacityExceeded,
    InvalidRequest,
}

impl ErrorCode {
    /// Numeric value of the code.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            ErrorCode::Unauthorized => 2,
            ErrorCode::Forbidden => 3,
            ErrorCode::NotFound => 4,
            ErrorCode::Conflict => 5,
            ErrorCode::Internal => 6,
            ErrorCode::CapacityExceeded => 7,
            ErrorCode::InvalidRequest => 8,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::CapacityExceeded => "CAPACITY_EXCEEDED",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
        };
        f.write_str(name)
    }
}

/// Errors decoding or encoding relay frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame was not valid JSON or did not match any known event
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Frame could not be encoded
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Binary frames are not part of the protocol
    #[error("Unexpected binary frame")]
    UnexpectedBinary,
}
