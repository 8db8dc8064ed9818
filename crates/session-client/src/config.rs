//! Client configuration.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `SESSION_RELAY_URL` | required |
//! | `SESSION_JOIN_TIMEOUT_MS` | 10000 |
//! | `SESSION_REACTION_TIMEOUT_MS` | 3000 |
//! | `SESSION_NEGOTIATION_STALL_TIMEOUT_MS` | 15000 |
//! | `SESSION_STALL_CHECK_INTERVAL_MS` | 5000 |
//! | `SESSION_MAX_RENEGOTIATION_ATTEMPTS` | 2 |
//! | `SESSION_ICE_SERVERS` | `stun:stun.l.google.com:19302` |
//!
//! Every duration is capped at [`MAX_DURATION_MS`].

use common::config::{millis_or, parse_or, required, string_or};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

pub use common::config::ConfigError;

pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 10_000;

/// How long a reaction stays visible without a newer one from the same sender.
pub const DEFAULT_REACTION_TIMEOUT_MS: u64 = 3_000;

pub const DEFAULT_NEGOTIATION_STALL_TIMEOUT_MS: u64 = 15_000;

pub const DEFAULT_STALL_CHECK_INTERVAL_MS: u64 = 5_000;

pub const DEFAULT_MAX_RENEGOTIATION_ATTEMPTS: u32 = 2;

pub const DEFAULT_ICE_SERVERS: &str = "stun:stun.l.google.com:19302";

/// Upper bound for every configured duration (one hour). Reaction expiry
/// and the stall ticker cannot schedule beyond this.
pub const MAX_DURATION_MS: u64 = 3_600_000;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the relay gateway (e.g. `ws://relay:8080/ws`).
    pub relay_url: String,

    /// Bound on waiting for the first join outcome.
    pub join_timeout: Duration,

    pub reaction_timeout: Duration,

    /// A link not stable after this long is considered stalled.
    pub negotiation_stall_timeout: Duration,

    pub stall_check_interval: Duration,

    /// ICE-restart offers allowed per stalled offering link.
    pub max_renegotiation_attempts: u32,

    pub ice_servers: Vec<String>,
}

impl ClientConfig {
    /// Defaults with the given relay URL.
    #[must_use]
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            join_timeout: Duration::from_millis(DEFAULT_JOIN_TIMEOUT_MS),
            reaction_timeout: Duration::from_millis(DEFAULT_REACTION_TIMEOUT_MS),
            negotiation_stall_timeout: Duration::from_millis(DEFAULT_NEGOTIATION_STALL_TIMEOUT_MS),
            stall_check_interval: Duration::from_millis(DEFAULT_STALL_CHECK_INTERVAL_MS),
            max_renegotiation_attempts: DEFAULT_MAX_RENEGOTIATION_ATTEMPTS,
            ice_servers: split_list(DEFAULT_ICE_SERVERS),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let relay_url = required(vars, "SESSION_RELAY_URL")?;
        if !(relay_url.starts_with("ws://") || relay_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(format!(
                "SESSION_RELAY_URL must be a ws:// or wss:// URL, got {relay_url}"
            )));
        }

        let join_timeout = bounded_millis(vars, "SESSION_JOIN_TIMEOUT_MS", DEFAULT_JOIN_TIMEOUT_MS)?;
        let reaction_timeout =
            bounded_millis(vars, "SESSION_REACTION_TIMEOUT_MS", DEFAULT_REACTION_TIMEOUT_MS)?;
        let negotiation_stall_timeout = bounded_millis(
            vars,
            "SESSION_NEGOTIATION_STALL_TIMEOUT_MS",
            DEFAULT_NEGOTIATION_STALL_TIMEOUT_MS,
        )?;
        let stall_check_interval = bounded_millis(
            vars,
            "SESSION_STALL_CHECK_INTERVAL_MS",
            DEFAULT_STALL_CHECK_INTERVAL_MS,
        )?;

        if stall_check_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "SESSION_STALL_CHECK_INTERVAL_MS must be greater than 0".to_string(),
            ));
        }

        let max_renegotiation_attempts = parse_or(
            vars,
            "SESSION_MAX_RENEGOTIATION_ATTEMPTS",
            DEFAULT_MAX_RENEGOTIATION_ATTEMPTS,
        )?;

        let ice_servers = split_list(&string_or(vars, "SESSION_ICE_SERVERS", DEFAULT_ICE_SERVERS));

        Ok(Self {
            relay_url,
            join_timeout,
            reaction_timeout,
            negotiation_stall_timeout,
            stall_check_interval,
            max_renegotiation_attempts,
            ice_servers,
        })
    }
}

fn bounded_millis(
    vars: &HashMap<String, String>,
    name: &str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    let value = millis_or(vars, name, default_ms)?;
    if value > Duration::from_millis(MAX_DURATION_MS) {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be at most {MAX_DURATION_MS}ms"
        )));
    }
    Ok(value)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
