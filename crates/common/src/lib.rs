//! Common utilities and types shared across Study Room components.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for common data types
pub mod types;

/// Module for common configuration helpers
pub mod config;

/// Module for the relay wire protocol
pub mod protocol;
