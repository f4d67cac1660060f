//! Rendezvous Service
//!
//! Stranger matchmaking, signaling relay and room lifecycle server.
//!
//! # Servers
//!
//! - HTTP server for `/ws` signaling and the room API (default: 0.0.0.0:8080)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Open the room store (PostgreSQL when `DATABASE_URL` is set, memory otherwise)
//! 4. Spawn the matching coordinator and build the application state
//! 5. Spawn the room sweeper and the `activeUsers` broadcaster
//! 6. Start the health server, then the signaling server
//! 7. Wait for shutdown signal, drain, cancel background tasks

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)]

use metrics_exporter_prometheus::PrometheusBuilder;
use rendezvous_service::config::Config;
use rendezvous_service::moderation::LoggingModerationSink;
use rendezvous_service::observability::HealthState;
use rendezvous_service::presence::start_active_users_broadcast;
use rendezvous_service::rooms::{start_room_sweeper, InMemoryRoomStore, PgRoomStore, RoomStore};
use rendezvous_service::routes::{self, AppState};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long in-flight sockets get to finish once shutdown starts.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rendezvous_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Rendezvous service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        room_max_age_seconds = config.room_max_age_seconds,
        room_idle_seconds = config.room_idle_seconds,
        persistent_rooms = config.database_url.is_some(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        format!("Failed to install Prometheus metrics recorder: {e}")
    })?;

    // Open the room store
    let (store, store_backend): (Arc<dyn RoomStore>, &'static str) = match &config.database_url
    {
        Some(database_url) => {
            info!("Connecting to database...");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(5))
                .connect(database_url.expose_secret())
                .await
                .map_err(|e| {
                    error!("Failed to connect to database: {}", e);
                    e
                })?;

            let store = PgRoomStore::new(pool);
            store.migrate().await.map_err(|e| {
                error!(error = %e, "Failed to apply migrations");
                e
            })?;
            info!("Database connection established");
            (Arc::new(store), "postgres")
        }
        None => {
            warn!("DATABASE_URL not set, rooms will not survive a restart");
            (Arc::new(InMemoryRoomStore::new()), "memory")
        }
    };

    let health_state = Arc::new(HealthState::new(store_backend));
    let shutdown_token = CancellationToken::new();

    // Build application state (spawns the coordinator)
    let (state, coordinator_task) = AppState::new(
        config.clone(),
        store,
        Arc::new(LoggingModerationSink),
        Arc::clone(&health_state),
        shutdown_token.child_token(),
    );
    let state = Arc::new(state);
    info!("Matching coordinator started");

    // Background tasks
    tokio::spawn(start_room_sweeper(
        Arc::clone(&state.rooms),
        config.sweep_interval(),
        shutdown_token.child_token(),
    ));
    tokio::spawn(start_active_users_broadcast(
        state.presence.clone(),
        state.relay.clone(),
        config.active_users_interval(),
        shutdown_token.child_token(),
    ));

    // Start health server (bind before spawning to fail fast)
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

    let health_app = routes::build_health_routes(Arc::clone(&health_state), prometheus_handle);
    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });
    info!(addr = %health_addr, "Health server started");

    // Start signaling server
    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = routes::build_routes(Arc::clone(&state));

    health_state.set_ready();
    info!("Rendezvous service listening on {}", addr);

    let drain_state = Arc::clone(&health_state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        // Stop advertising readiness and refuse new sockets
        drain_state.start_draining();
        info!(
            connections = drain_state.connections(),
            "Draining signaling connections"
        );
        tokio::time::sleep(DRAIN_GRACE).await;
    })
    .await?;

    shutdown_token.cancel();
    if let Err(e) = coordinator_task.await {
        warn!(error = %e, "Coordinator task ended abnormally");
    }

    info!("Rendezvous service shutdown complete");
    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
