//! HTTP routes for the Rendezvous service.
//!
//! Defines the Axum routers and the application state shared by handlers.

use crate::config::Config;
use crate::handlers;
use crate::matching::{MatchingCoordinator, MatchingCoordinatorHandle};
use crate::moderation::ModerationSink;
use crate::observability::{health_router, HealthState};
use crate::presence::PresenceTracker;
use crate::rooms::{RoomManager, RoomStore, RoomWatch};
use crate::signaling::SignalingRelay;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Mailbox of the matching coordinator actor.
    pub coordinator: MatchingCoordinatorHandle,

    /// Outboxes of every open signaling connection.
    pub relay: SignalingRelay,

    pub presence: PresenceTracker,

    pub rooms: Arc<RoomManager>,

    pub health: Arc<HealthState>,
}

impl AppState {
    /// Wire the in-process components around a room store and spawn the
    /// coordinator. The returned task ends when `cancel_token` is cancelled.
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<dyn RoomStore>,
        moderation: Arc<dyn ModerationSink>,
        health: Arc<HealthState>,
        cancel_token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let relay = SignalingRelay::new(config.outbox_capacity);
        let presence = PresenceTracker::new();
        let (coordinator, coordinator_task) = MatchingCoordinator::spawn(
            relay.clone(),
            presence.clone(),
            moderation,
            cancel_token,
        );
        let rooms = Arc::new(RoomManager::new(
            store,
            relay.clone(),
            presence.clone(),
            RoomWatch::default(),
            config.expiration_policy(),
            config.password_hash_cost,
        ));

        (
            Self {
                config,
                coordinator,
                relay,
                presence,
                rooms,
                health,
            },
            coordinator_task,
        )
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/ws` - signaling WebSocket (`?userId=` optional)
/// - `/api/v1/rooms` - room lifecycle API, caller named by `x-user-id`
/// - TraceLayer for request logging
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(handlers::ws_handler))
        .route("/api/v1/rooms", post(handlers::create_room))
        .route("/api/v1/rooms/:room_id", get(handlers::get_room))
        .route("/api/v1/rooms/:room_id/join", post(handlers::join_room))
        .route("/api/v1/rooms/:room_id/leave", post(handlers::leave_room))
        .route("/api/v1/rooms/:room_id/busy", post(handlers::mark_busy))
        .route("/api/v1/rooms/:room_id/invite", post(handlers::invite))
        .route("/api/v1/rooms/:room_id/kick", post(handlers::kick))
        .route("/api/v1/rooms/:room_id/mute", post(handlers::mute))
        .route("/api/v1/rooms/:room_id/end", post(handlers::end_room))
        .route(
            "/api/v1/rooms/:room_id/activity",
            post(handlers::record_activity),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}

/// Build the operational routes served on the health port:
/// `/health`, `/ready` and `/metrics`.
pub fn build_health_routes(
    health_state: Arc<HealthState>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    health_router(health_state).merge(metrics_routes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
