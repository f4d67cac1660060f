//! Room change notifications.
//!
//! Notifications are triggers, not state: a subscriber re-reads the room
//! through the manager when one arrives. Delivery is at-least-once from the
//! subscriber's point of view because a lagged subscriber is told to resync
//! everything it tracks.

use common::types::RoomId;
use tokio::sync::broadcast;
use tracing::debug;

/// Default broadcast capacity.
pub const DEFAULT_WATCH_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomChangeKind {
    Created,
    Participants,
    Status,
    Activity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomChange {
    pub room_id: RoomId,
    pub kind: RoomChangeKind,
}

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomNotification {
    Changed(RoomChange),
    /// Notifications were missed; re-read every room of interest.
    Resync,
}

/// Publisher side, shared by the manager and the sweeper.
#[derive(Clone)]
pub struct RoomWatch {
    sender: broadcast::Sender<RoomChange>,
}

impl RoomWatch {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a change. Having no subscribers is not an error.
    pub fn publish(&self, room_id: &RoomId, kind: RoomChangeKind) {
        let _ = self.sender.send(RoomChange {
            room_id: room_id.clone(),
            kind,
        });
    }

    #[must_use]
    pub fn subscribe(&self) -> RoomSubscription {
        RoomSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for RoomWatch {
    fn default() -> Self {
        Self::new(DEFAULT_WATCH_CAPACITY)
    }
}

pub struct RoomSubscription {
    receiver: broadcast::Receiver<RoomChange>,
}

impl RoomSubscription {
    /// Wait for the next notification. `None` once the publisher is gone.
    pub async fn next(&mut self) -> Option<RoomNotification> {
        match self.receiver.recv().await {
            Ok(change) => Some(RoomNotification::Changed(change)),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!(target: "rv.rooms.manager", missed, "Room watcher lagged, resync required");
                Some(RoomNotification::Resync)
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}
