//! Health endpoints for the Rendezvous service.
//!
//! - `GET /health` - liveness (the process is running)
//! - `GET /ready` - readiness (coordinator spawned, room store reachable,
//!   not draining)
//!
//! `/metrics` is mounted next to these by `main` using the Prometheus handle.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Liveness and readiness flags shared between `main` and the probes.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
    draining: AtomicBool,
    /// Open signaling connections, reported in the readiness body.
    connections: AtomicUsize,
    store_backend: &'static str,
}

impl HealthState {
    /// Create a health state (live, not ready) for the given store backend
    /// label ("memory" or "postgres").
    #[must_use]
    pub fn new(store_backend: &'static str) -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
            store_backend,
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Stop advertising readiness while in-flight connections finish.
    pub fn start_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.draining.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturate at zero
        let _ = self
            .connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Serialize)]
struct ReadinessBody {
    status: &'static str,
    store: &'static str,
    connections: usize,
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<ReadinessBody>) {
    let (status_code, status) = if state.is_ready() {
        (StatusCode::OK, "ready")
    } else if state.is_draining() {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    };

    (
        status_code,
        Json(ReadinessBody {
            status,
            store: state.store_backend,
            connections: state.connections(),
        }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get_ready(state: Arc<HealthState>) -> (StatusCode, serde_json::Value) {
        let response = health_router(state)
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_health_state_lifecycle() {
        let state = HealthState::new("memory");
        assert!(state.is_live());
        assert!(!state.is_ready(), "Should not be ready before startup completes");

        state.set_ready();
        assert!(state.is_ready());

        state.start_draining();
        assert!(!state.is_ready(), "Draining must clear readiness");
        assert!(state.is_draining());
    }

    #[test]
    fn test_connection_counter_saturates_at_zero() {
        let state = HealthState::new("memory");
        state.connection_closed();
        assert_eq!(state.connections(), 0);

        state.connection_opened();
        state.connection_opened();
        state.connection_closed();
        assert_eq!(state.connections(), 1);
    }

    #[tokio::test]
    async fn test_liveness_endpoint() {
        let response = health_router(Arc::new(HealthState::new("memory")))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_reports_phase() {
        let state = Arc::new(HealthState::new("postgres"));

        let (status, body) = get_ready(Arc::clone(&state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "starting");
        assert_eq!(body["store"], "postgres");

        state.set_ready();
        let (status, body) = get_ready(Arc::clone(&state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");

        state.start_draining();
        let (status, body) = get_ready(state).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "draining");
    }
}
