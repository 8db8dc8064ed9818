//! Study Room session client.
//!
//! Client core of a study room: a full mesh of direct peer media links
//! negotiated through the relay, plus local views of the room state the
//! relay owns (roster and host, study progress, reactions).
//!
//! # Modules
//!
//! - [`session`] - join orchestration and the per-session actor
//! - [`peer`] - peer link manager and the media connection seam
//! - [`roster`] - roster and host synchronizer
//! - [`progress`] - study progress synchronizer
//! - [`reactions`] - per-sender reactions with auto-expiry
//! - [`relay`] - relay transport and scoped subscriptions
//! - [`media`] - local capture and remote stream handles
//! - [`config`] - configuration from environment
//! - [`errors`] - client error types

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod errors;
pub mod media;
pub mod peer;
pub mod progress;
pub mod reactions;
pub mod relay;
pub mod roster;
pub mod session;

pub use config::ClientConfig;
pub use errors::{ClientError, NegotiationError};
pub use session::{
    Identity, Notice, Session, SessionDeps, SessionExit, SessionHandle, SessionSnapshot,
    StudyIntent,
};
