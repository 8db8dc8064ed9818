//! Study Room Relay
//!
//! Room registry and signaling relay for peer-to-peer study rooms.
//!
//! # Servers
//!
//! - WebSocket gateway for clients at `/ws` (default: 0.0.0.0:8080)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (plain or JSON)
//! 3. Initialize Prometheus metrics recorder
//! 4. Load question lists
//! 5. Initialize actor system (`RoomRegistryHandle`)
//! 6. Start health HTTP server (liveness, readiness, metrics)
//! 7. Start WebSocket gateway and mark ready
//! 8. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relay_service::actors::{ActorMetrics, RoomRegistryHandle};
use relay_service::config::Config;
use relay_service::gateway::gateway_router;
use relay_service::observability::{health_router, init_metrics_recorder, HealthState};
use relay_service::questions::{InMemoryQuestionStore, QuestionListStore};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time given to open sockets to observe cancellation before exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    let log_json = config.as_ref().is_ok_and(|c| c.log_json);

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "relay=debug,tower_http=debug".into());
    let plain_layer = (!log_json).then(tracing_subscriber::fmt::layer);
    let json_layer = log_json.then(|| tracing_subscriber::fmt::layer().json());
    tracing_subscriber::registry()
        .with(filter)
        .with(plain_layer)
        .with(json_layer)
        .init();

    info!("Starting Study Room relay");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        max_rooms = config.max_rooms,
        default_max_participants = config.default_max_participants,
        max_participants_cap = config.max_participants_cap,
        bar_joins_in_progress = config.bar_joins_in_progress,
        pending_room_ttl_seconds = config.pending_room_ttl.as_secs(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    let question_store = match &config.question_lists_path {
        Some(path) => InMemoryQuestionStore::from_json_file(path).map_err(|e| {
            error!(error = %e, path = %path, "Failed to load question lists");
            e
        })?,
        None => {
            warn!("RELAY_QUESTION_LISTS_PATH not set, no question lists available");
            InMemoryQuestionStore::new()
        }
    };
    info!(lists = question_store.len(), "Question lists loaded");
    let question_store: Arc<dyn QuestionListStore> = Arc::new(question_store);

    info!("Initializing actor system...");
    let registry = RoomRegistryHandle::new(&config, question_store, ActorMetrics::new());
    info!("Actor system initialized");

    let shutdown_token = registry.child_token();

    // Health server must bind or startup fails
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;
    info!(addr = %health_addr, "Health server bound successfully");

    let health_app = health_router(Arc::clone(&health_state), Some(prometheus_handle));
    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // WebSocket gateway
    let gateway_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid gateway bind address");
        format!("Invalid gateway bind address: {e}")
    })?;

    let gateway_listener = tokio::net::TcpListener::bind(gateway_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %gateway_addr, "Failed to bind gateway");
            format!("Failed to bind gateway to {gateway_addr}: {e}")
        })?;

    let gateway_app = gateway_router(registry.clone());
    let gateway_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %gateway_addr, "Gateway starting");
        let server = axum::serve(gateway_listener, gateway_app).with_graceful_shutdown(async move {
            gateway_shutdown_token.cancelled().await;
            info!("Gateway shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Gateway failed");
        }
    });
    info!(addr = %gateway_addr, "Gateway started");

    health_state.set_ready();

    info!("Relay running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Stop receiving traffic before tearing rooms down
    health_state.set_not_ready();

    if let Err(e) = registry.shutdown().await {
        warn!(error = %e, "Actor system shutdown error");
    }
    shutdown_token.cancel();

    tokio::time::sleep(SHUTDOWN_GRACE).await;

    info!("Relay shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
