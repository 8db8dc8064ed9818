//! Study Room relay service library.
//!
//! The relay is the one server-side component of a study room:
//!
//! - Room registry: creation, listing and lookup of rooms
//! - Authoritative room state: roster, host, study progress and index
//! - Unicast relay of offer/answer/candidate payloads between members
//! - Fan-out of roster, host, progress and reaction events
//!
//! Media never passes through the relay; members connect to each other
//! directly once signaling completes.
//!
//! # Modules
//!
//! - [`actors`] - Registry, room and connection actors
//! - [`gateway`] - WebSocket endpoint and per-socket dispatch
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with wire error codes
//! - [`questions`] - Question list lookup
//! - [`observability`] - Health endpoints and Prometheus metrics

pub mod actors;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod observability;
pub mod questions;
