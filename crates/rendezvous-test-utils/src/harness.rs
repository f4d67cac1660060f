//! In-process service harness.
//!
//! `TestService` wires the real `AppState` around an in-memory (or injected)
//! room store. `TestClient` stands in for one WebSocket: frames go through
//! the real `dispatch_frame`, and events are read from the connection's
//! outbox, so everything except the socket itself is exercised.

use crate::fixtures::test_config;
use crate::mock_moderation::RecordingModerationSink;
use axum::Router;
use common::signaling::{ClientMessage, ServerEvent};
use common::types::{AccountId, ConnectionId};
use rendezvous_service::handlers::dispatch_frame;
use rendezvous_service::observability::HealthState;
use rendezvous_service::rooms::{InMemoryRoomStore, RoomStore};
use rendezvous_service::routes::{self, AppState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long `next_event` waits before failing the test.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TestService {
    state: Arc<AppState>,
    moderation: RecordingModerationSink,
    cancel_token: CancellationToken,
    _coordinator: JoinHandle<()>,
}

impl TestService {
    /// Spawn a service backed by an in-memory room store.
    pub fn spawn() -> Self {
        Self::with_store(Arc::new(InMemoryRoomStore::new()))
    }

    /// Spawn a service backed by `store`.
    pub fn with_store(store: Arc<dyn RoomStore>) -> Self {
        let moderation = RecordingModerationSink::new();
        let health = Arc::new(HealthState::new("memory"));
        health.set_ready();
        let cancel_token = CancellationToken::new();

        let (state, coordinator) = AppState::new(
            test_config(),
            store,
            Arc::new(moderation.clone()),
            health,
            cancel_token.child_token(),
        );

        Self {
            state: Arc::new(state),
            moderation,
            cancel_token,
            _coordinator: coordinator,
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn moderation(&self) -> &RecordingModerationSink {
        &self.moderation
    }

    /// The real application router over this service's state.
    pub fn router(&self) -> Router {
        routes::build_routes(Arc::clone(&self.state))
    }

    /// Open a signaling connection, optionally for an account.
    pub async fn connect(&self, account_id: Option<&str>) -> TestClient {
        let connection_id = ConnectionId::generate();
        let account_id = account_id.map(AccountId::from);
        let outbox = self.state.relay.register(connection_id.clone()).await;
        self.state
            .presence
            .register(connection_id.clone(), account_id.clone())
            .await;

        TestClient {
            state: Arc::clone(&self.state),
            connection_id,
            account_id,
            outbox,
        }
    }
}

impl Drop for TestService {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// One simulated signaling connection.
pub struct TestClient {
    state: Arc<AppState>,
    connection_id: ConnectionId,
    account_id: Option<AccountId>,
    outbox: mpsc::Receiver<ServerEvent>,
}

impl TestClient {
    pub fn id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn account(&self) -> Option<&AccountId> {
        self.account_id.as_ref()
    }

    /// Send a raw text frame.
    pub async fn send(&self, frame: &str) {
        dispatch_frame(
            &self.state,
            &self.connection_id,
            self.account_id.as_ref(),
            frame,
        )
        .await;
    }

    pub async fn send_message(&self, message: &ClientMessage) {
        self.send(&crate::fixtures::frame(message)).await;
    }

    /// Next event, failing the test after `EVENT_TIMEOUT`.
    pub async fn next_event(&mut self) -> ServerEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.outbox.recv())
            .await
            .expect("timed out waiting for server event")
            .expect("outbox closed")
    }

    /// Next event if one arrives within `wait`.
    pub async fn try_next_event(&mut self, wait: Duration) -> Option<ServerEvent> {
        tokio::time::timeout(wait, self.outbox.recv())
            .await
            .ok()
            .flatten()
    }

    /// Assert nothing is queued right now.
    pub async fn assert_no_event(&mut self) {
        if let Some(event) = self.try_next_event(Duration::from_millis(50)).await {
            panic!("unexpected event: {event:?}");
        }
    }

    /// Close the connection the way the socket handler does.
    pub async fn disconnect(self) {
        self.state
            .coordinator
            .disconnect(self.connection_id.clone())
            .await
            .expect("coordinator must be running");
        self.state.relay.unregister(&self.connection_id).await;
        self.state.presence.unregister(&self.connection_id).await;
    }
}
