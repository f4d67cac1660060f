//! Room expiration sweeper.
//!
//! Recurring background task that applies the expiration policy to open
//! rooms. Owned by `main` through a `CancellationToken`.

use super::manager::RoomManager;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Start the sweeper.
///
/// Runs one pass every `interval` until `cancel_token` is cancelled.
#[instrument(skip_all, name = "rv.rooms.sweeper")]
pub async fn start_room_sweeper(
    manager: Arc<RoomManager>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let policy = manager.policy();
    info!(
        target: "rv.rooms.sweeper",
        interval_seconds = interval.as_secs(),
        max_age_seconds = policy.max_age().as_secs(),
        idle_seconds = policy.idle_timeout().as_secs(),
        "Starting room sweeper"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_sweep(&manager).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "rv.rooms.sweeper",
                    "Room sweeper received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}

/// Run a single sweep. Returns the number of rooms ended.
pub(crate) async fn run_sweep(manager: &RoomManager) -> usize {
    match manager.sweep_expired_at(Utc::now()).await {
        Ok(expired) if expired.is_empty() => {
            debug!(target: "rv.rooms.sweeper", "Sweep found no expired rooms");
            0
        }
        Ok(expired) => {
            for (room_id, reason) in &expired {
                debug!(
                    target: "rv.rooms.sweeper",
                    room_id = %room_id,
                    reason = reason.as_str(),
                    "Room expired"
                );
            }
            info!(
                target: "rv.rooms.sweeper",
                expired = expired.len(),
                "Sweep ended expired rooms"
            );
            expired.len()
        }
        Err(e) => {
            warn!(
                target: "rv.rooms.sweeper",
                error = %e,
                "Sweep failed, will retry next interval"
            );
            0
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::presence::PresenceTracker;
    use crate::rooms::expiration::ExpirationPolicy;
    use crate::rooms::model::RoomStatus;
    use crate::rooms::store::{InMemoryRoomStore, RoomStore};
    use crate::rooms::watch::RoomWatch;
    use crate::signaling::SignalingRelay;
    use common::types::{AccountId, GroupId};

    fn manager_with_policy(policy: ExpirationPolicy) -> Arc<RoomManager> {
        Arc::new(RoomManager::new(
            Arc::new(InMemoryRoomStore::new()) as Arc<dyn RoomStore>,
            SignalingRelay::new(4),
            PresenceTracker::new(),
            RoomWatch::default(),
            policy,
            4,
        ))
    }

    #[tokio::test]
    async fn test_run_sweep_with_nothing_to_do() {
        let manager = manager_with_policy(ExpirationPolicy::default());
        manager
            .create_room(GroupId::from("g"), AccountId::from("h"), "fresh", None)
            .await
            .unwrap();

        assert_eq!(run_sweep(&manager).await, 0);
    }

    #[tokio::test]
    async fn test_run_sweep_ends_expired_rooms() {
        let manager = manager_with_policy(ExpirationPolicy::new(
            Duration::ZERO,
            Duration::from_secs(300),
        ));
        let room = manager
            .create_room(GroupId::from("g"), AccountId::from("h"), "old", None)
            .await
            .unwrap();

        assert_eq!(run_sweep(&manager).await, 1);
        let snapshot = manager.get_room(&room.id).await.unwrap();
        assert_eq!(snapshot.room.status, RoomStatus::Ended);
        assert_eq!(run_sweep(&manager).await, 0);
    }

    #[tokio::test]
    async fn test_sweeper_exits_on_cancel() {
        let manager = manager_with_policy(ExpirationPolicy::default());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(start_room_sweeper(
            manager,
            Duration::from_secs(60),
            cancel.clone(),
        ));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
