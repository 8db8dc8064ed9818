//! Observability module for the relay service.
//!
//! # Privacy by Default
//!
//! Actor loops use `#[instrument(skip_all)]` with explicit identifier
//! fields. SDP bodies, ICE candidates and nicknames are never logged.
//! Metric labels are bounded to prevent cardinality explosion:
//! - `actor_type`: 3 values (registry, room, connection)
//! - `outcome`: bounded join outcomes
//! - `kind`: offer, answer, candidate
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `relay_rooms_active` | Gauge | none | Registered rooms |
//! | `relay_connections_active` | Gauge | none | Open WebSocket connections |
//! | `relay_participants_active` | Gauge | none | Participants inside a room |
//! | `relay_joins_total` | Counter | `outcome` | Join attempts by result |
//! | `relay_signals_relayed_total` | Counter | `kind` | Unicast signaling volume |
//! | `relay_signals_dropped_total` | Counter | `kind` | Signals for unknown targets |
//! | `relay_host_elections_total` | Counter | none | Host re-elections |
//! | `relay_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `relay_actor_panics_total` | Counter | `actor_type` | Actor panics (bugs) |
//! | `relay_message_latency_seconds` | Histogram | `event` | Client message handling latency |

pub mod health;
pub mod metrics;

// Re-exports for convenience
pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
