//! Health and metrics endpoints for the relay service.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (is the registry accepting rooms?)
//! - `GET /metrics` - Prometheus text rendering, when a handle is attached
//!
//! The relay becomes ready once the gateway listener is bound and drops
//! back to not-ready when shutdown begins, so load balancers stop routing
//! new sockets while existing rooms drain.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness and readiness flags shared between `main` and the HTTP handlers.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct ObservabilityState {
    health: Arc<HealthState>,
    prometheus: Option<PrometheusHandle>,
}

/// Create the health router.
///
/// `/metrics` is only routed when `prometheus` is provided.
pub fn health_router(health: Arc<HealthState>, prometheus: Option<PrometheusHandle>) -> Router {
    let with_metrics = prometheus.is_some();
    let router = Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler));

    let router = if with_metrics {
        router.route("/metrics", get(metrics_handler))
    } else {
        router
    };

    router.with_state(ObservabilityState { health, prometheus })
}

async fn liveness_handler(State(state): State<ObservabilityState>) -> StatusCode {
    if state.health.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<ObservabilityState>) -> StatusCode {
    if state.health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics_handler(State(state): State<ObservabilityState>) -> (StatusCode, String) {
    match state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}
