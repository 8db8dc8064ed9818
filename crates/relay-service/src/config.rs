//! Relay service configuration.
//!
//! Configuration is loaded from environment variables. Every field has a
//! default, so an empty environment yields a working development setup.

use common::config::{bool_or, parse_or, string_or};
pub use common::config::ConfigError;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Default WebSocket gateway bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default maximum number of rooms held by one relay.
pub const DEFAULT_MAX_ROOMS: usize = 1000;

/// Default participant limit for a room created without one.
pub const DEFAULT_MAX_PARTICIPANTS: usize = 4;

/// Upper bound a room creator may request.
pub const DEFAULT_MAX_PARTICIPANTS_CAP: usize = 8;

/// Default time a created room waits for its first join.
pub const DEFAULT_PENDING_ROOM_TTL_SECONDS: u64 = 300;

/// Smallest room that still makes a mesh.
pub const MIN_PARTICIPANTS: usize = 2;

/// Relay service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket gateway bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health and metrics bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Maximum concurrent rooms.
    pub max_rooms: usize,

    /// Participant limit applied when a creator does not pick one.
    pub default_max_participants: usize,

    /// Largest participant limit a creator may pick.
    pub max_participants_cap: usize,

    /// Whether joins are rejected while a room's study session runs.
    pub bar_joins_in_progress: bool,

    /// How long a created room waits for its first participant.
    pub pending_room_ttl: Duration,

    /// Optional JSON file seeding the question list store.
    pub question_lists_path: Option<String>,

    /// Emit JSON-formatted logs.
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            health_bind_address: DEFAULT_HEALTH_BIND_ADDRESS.to_string(),
            max_rooms: DEFAULT_MAX_ROOMS,
            default_max_participants: DEFAULT_MAX_PARTICIPANTS,
            max_participants_cap: DEFAULT_MAX_PARTICIPANTS_CAP,
            bar_joins_in_progress: true,
            pending_room_ttl: Duration::from_secs(DEFAULT_PENDING_ROOM_TTL_SECONDS),
            question_lists_path: None,
            log_json: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = string_or(vars, "RELAY_BIND_ADDRESS", DEFAULT_BIND_ADDRESS);
        let health_bind_address =
            string_or(vars, "RELAY_HEALTH_BIND_ADDRESS", DEFAULT_HEALTH_BIND_ADDRESS);

        let max_rooms = parse_or(vars, "RELAY_MAX_ROOMS", DEFAULT_MAX_ROOMS)?;
        let default_max_participants = parse_or(
            vars,
            "RELAY_DEFAULT_MAX_PARTICIPANTS",
            DEFAULT_MAX_PARTICIPANTS,
        )?;
        let max_participants_cap = parse_or(
            vars,
            "RELAY_MAX_PARTICIPANTS_CAP",
            DEFAULT_MAX_PARTICIPANTS_CAP,
        )?;

        if max_participants_cap < MIN_PARTICIPANTS {
            return Err(ConfigError::InvalidValue(format!(
                "RELAY_MAX_PARTICIPANTS_CAP must be at least {MIN_PARTICIPANTS}"
            )));
        }
        if default_max_participants < MIN_PARTICIPANTS
            || default_max_participants > max_participants_cap
        {
            return Err(ConfigError::InvalidValue(format!(
                "RELAY_DEFAULT_MAX_PARTICIPANTS must be within [{MIN_PARTICIPANTS}, {max_participants_cap}]"
            )));
        }

        let bar_joins_in_progress = bool_or(vars, "RELAY_BAR_JOINS_IN_PROGRESS", true)?;

        let pending_room_ttl = Duration::from_secs(parse_or(
            vars,
            "RELAY_PENDING_ROOM_TTL_SECONDS",
            DEFAULT_PENDING_ROOM_TTL_SECONDS,
        )?);

        let question_lists_path = vars
            .get("RELAY_QUESTION_LISTS_PATH")
            .filter(|p| !p.is_empty())
            .cloned();

        let log_json = bool_or(vars, "RELAY_LOG_JSON", false)?;

        Ok(Config {
            bind_address,
            health_bind_address,
            max_rooms,
            default_max_participants,
            max_participants_cap,
            bar_joins_in_progress,
            pending_room_ttl,
            question_lists_path,
            log_json,
        })
    }
}
