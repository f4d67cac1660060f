//! Presence tracking.
//!
//! Tracks which signaling connections are open and which account (if any)
//! each belongs to. An account is online while at least one of its
//! connections is open.
//!
//! The matching coordinator consults presence during its pool scan so that
//! candidates whose connection already went away are evicted instead of
//! matched. The room manager uses it to find the connections of a room member.

use crate::observability::metrics;
use crate::signaling::SignalingRelay;
use common::signaling::ServerEvent;
use common::types::{AccountId, ConnectionId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

#[derive(Debug, Default)]
struct PresenceInner {
    connections: HashMap<ConnectionId, Option<AccountId>>,
    accounts: HashMap<AccountId, HashSet<ConnectionId>>,
}

/// Online/offline status per connection and account.
#[derive(Clone, Default)]
pub struct PresenceTracker {
    inner: Arc<RwLock<PresenceInner>>,
}

impl PresenceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a connection online, optionally bound to an account.
    pub async fn register(&self, connection_id: ConnectionId, account_id: Option<AccountId>) {
        let count = {
            let mut inner = self.inner.write().await;
            if let Some(account_id) = &account_id {
                inner
                    .accounts
                    .entry(account_id.clone())
                    .or_default()
                    .insert(connection_id.clone());
            }
            inner.connections.insert(connection_id.clone(), account_id);
            inner.connections.len()
        };

        debug!(
            target: "rv.presence",
            connection_id = %connection_id,
            online = count,
            "Connection online"
        );
        metrics::set_active_users(count);
    }

    /// Mark a connection offline. Returns `false` if it was not registered.
    pub async fn unregister(&self, connection_id: &ConnectionId) -> bool {
        let (removed, count) = {
            let mut inner = self.inner.write().await;
            let removed = inner.connections.remove(connection_id);
            if let Some(Some(account_id)) = &removed {
                let now_empty = match inner.accounts.get_mut(account_id) {
                    Some(set) => {
                        set.remove(connection_id);
                        set.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    inner.accounts.remove(account_id);
                }
            }
            (removed.is_some(), inner.connections.len())
        };

        if removed {
            debug!(
                target: "rv.presence",
                connection_id = %connection_id,
                online = count,
                "Connection offline"
            );
            metrics::set_active_users(count);
        }
        removed
    }

    pub async fn is_connected(&self, connection_id: &ConnectionId) -> bool {
        self.inner.read().await.connections.contains_key(connection_id)
    }

    /// Account bound to a connection, if any.
    pub async fn account_of(&self, connection_id: &ConnectionId) -> Option<AccountId> {
        self.inner
            .read()
            .await
            .connections
            .get(connection_id)
            .cloned()
            .flatten()
    }

    /// Open connections of an account, sorted for deterministic fan-out.
    pub async fn connections_of(&self, account_id: &AccountId) -> Vec<ConnectionId> {
        let inner = self.inner.read().await;
        let mut connections: Vec<ConnectionId> = inner
            .accounts
            .get(account_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        connections.sort();
        connections
    }

    /// Number of open connections.
    pub async fn online_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

}

/// Start the `activeUsers` broadcast task.
///
/// Every `interval`, pushes `activeUsers {count}` to every registered outbox.
/// Returns when the cancellation token is triggered.
#[instrument(skip_all, name = "rv.presence.broadcast")]
pub async fn start_active_users_broadcast(
    presence: PresenceTracker,
    relay: SignalingRelay,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "rv.presence",
        interval_seconds = interval.as_secs(),
        "Starting activeUsers broadcast task"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                broadcast_active_users(&presence, &relay).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "rv.presence",
                    "activeUsers broadcast task received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}

/// Run a single broadcast. Returns how many outboxes accepted the event.
pub(crate) async fn broadcast_active_users(
    presence: &PresenceTracker,
    relay: &SignalingRelay,
) -> usize {
    let count = presence.online_count().await;
    let delivered = relay.broadcast(&ServerEvent::ActiveUsers { count }).await;
    debug!(
        target: "rv.presence",
        count,
        delivered,
        "Broadcast activeUsers"
    );
    delivered
}
