//! Per-connection outboxes and at-most-once event delivery.
//!
//! Every signaling connection owns one bounded outbox. Events for a given
//! destination are pushed with `try_send` from whichever task routes them, so
//! delivery between a fixed directed pair stays FIFO as long as that pair is
//! routed by a single task (the matching coordinator for 1:1 pairings).
//!
//! There is no retry or dedup layer. A full or missing outbox drops the event
//! and the drop is logged; the sender is never told.

use crate::observability::metrics;
use common::signaling::ServerEvent;
use common::types::ConnectionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Why an event was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Sender and destination are not currently paired.
    NotPaired,
    /// Destination has no registered outbox.
    NoOutbox,
    /// Destination outbox is full.
    OutboxFull,
    /// Destination outbox receiver was dropped.
    OutboxClosed,
}

impl DropReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DropReason::NotPaired => "not_paired",
            DropReason::NoOutbox => "no_outbox",
            DropReason::OutboxFull => "outbox_full",
            DropReason::OutboxClosed => "outbox_closed",
        }
    }
}

/// Result of routing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    Dropped(DropReason),
}

impl RelayOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RelayOutcome::Delivered => "delivered",
            RelayOutcome::Dropped(reason) => reason.as_str(),
        }
    }

    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, RelayOutcome::Delivered)
    }
}

/// Registry of connection outboxes.
#[derive(Clone)]
pub struct SignalingRelay {
    outboxes: Arc<RwLock<HashMap<ConnectionId, mpsc::Sender<ServerEvent>>>>,
    capacity: usize,
}

impl SignalingRelay {
    /// Create a relay whose outboxes buffer `capacity` events each.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            outboxes: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Register an outbox for a connection and return its receiving end.
    ///
    /// Re-registering a connection replaces the previous outbox; the old
    /// receiver observes a closed channel.
    pub async fn register(&self, connection_id: ConnectionId) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.outboxes.write().await.insert(connection_id, tx);
        rx
    }

    /// Remove a connection's outbox. Returns `false` if none was registered.
    pub async fn unregister(&self, connection_id: &ConnectionId) -> bool {
        self.outboxes.write().await.remove(connection_id).is_some()
    }

    pub async fn is_registered(&self, connection_id: &ConnectionId) -> bool {
        self.outboxes.read().await.contains_key(connection_id)
    }

    /// Push one event to a connection's outbox.
    pub async fn deliver(&self, to: &ConnectionId, event: ServerEvent) -> RelayOutcome {
        let label = event.label();
        let outcome = {
            let outboxes = self.outboxes.read().await;
            match outboxes.get(to) {
                None => RelayOutcome::Dropped(DropReason::NoOutbox),
                Some(sender) => match sender.try_send(event) {
                    Ok(()) => RelayOutcome::Delivered,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        RelayOutcome::Dropped(DropReason::OutboxFull)
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        RelayOutcome::Dropped(DropReason::OutboxClosed)
                    }
                },
            }
        };

        match outcome {
            RelayOutcome::Delivered => {}
            RelayOutcome::Dropped(DropReason::OutboxFull) => {
                warn!(
                    target: "rv.signaling.relay",
                    to = %to,
                    event = label,
                    "Outbox full, dropping event"
                );
            }
            RelayOutcome::Dropped(reason) => {
                debug!(
                    target: "rv.signaling.relay",
                    to = %to,
                    event = label,
                    reason = reason.as_str(),
                    "Event dropped"
                );
            }
        }

        outcome
    }

    /// Push one event to every registered outbox. Returns how many accepted it.
    pub async fn broadcast(&self, event: &ServerEvent) -> usize {
        let outboxes = self.outboxes.read().await;
        outboxes
            .values()
            .filter(|sender| sender.try_send(event.clone()).is_ok())
            .count()
    }

    pub async fn connection_count(&self) -> usize {
        self.outboxes.read().await.len()
    }
}

/// Record a relay outcome under the given message kind.
pub(crate) fn record_outcome(kind: &'static str, outcome: RelayOutcome) {
    metrics::record_relay(kind, outcome.as_str());
}
