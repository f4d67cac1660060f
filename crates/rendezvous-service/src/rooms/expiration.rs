//! Room expiration policy.

use super::model::{Room, RoomActivity};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Why a room was expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    /// Absolute age since creation reached the limit.
    MaxAge,
    /// At most one participant and no activity for the idle timeout.
    Idle,
}

impl ExpiryReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ExpiryReason::MaxAge => "max_age",
            ExpiryReason::Idle => "idle",
        }
    }
}

/// Absolute-age and idle thresholds for open rooms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    max_age: Duration,
    idle_timeout: Duration,
}

impl ExpirationPolicy {
    #[must_use]
    pub const fn new(max_age: Duration, idle_timeout: Duration) -> Self {
        Self {
            max_age,
            idle_timeout,
        }
    }

    #[must_use]
    pub const fn max_age(&self) -> Duration {
        self.max_age
    }

    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Decide whether `room` is expired at `now`.
    ///
    /// Ended rooms never expire again. Absolute age is checked first, so it
    /// wins when both predicates hold. A room without an activity row is
    /// idle since creation with no participants.
    #[must_use]
    pub fn evaluate(
        &self,
        room: &Room,
        activity: Option<&RoomActivity>,
        now: DateTime<Utc>,
    ) -> Option<ExpiryReason> {
        if !room.status.is_open() {
            return None;
        }

        if elapsed(room.created_at, now) >= self.max_age {
            return Some(ExpiryReason::MaxAge);
        }

        let (last_active, participant_count) = activity.map_or((room.created_at, 0), |activity| {
            (activity.last_active, activity.participant_count)
        });

        if participant_count <= 1 && elapsed(last_active, now) >= self.idle_timeout {
            return Some(ExpiryReason::Idle);
        }

        None
    }
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(600), Duration::from_secs(300))
    }
}

/// Time from `since` to `now`, zero if `since` is in the future.
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::rooms::model::RoomStatus;
    use chrono::TimeDelta;
    use common::types::{AccountId, GroupId, RoomId};

    fn room_created_at(created_at: DateTime<Utc>) -> Room {
        Room {
            id: RoomId::from("r"),
            name: "room".to_string(),
            group_id: GroupId::from("g"),
            host_id: AccountId::from("h"),
            password_hash: None,
            status: RoomStatus::Waiting,
            created_at,
            ended_at: None,
        }
    }

    fn activity(last_active: DateTime<Utc>, participant_count: u32) -> RoomActivity {
        RoomActivity {
            room_id: RoomId::from("r"),
            last_active,
            participant_count,
        }
    }

    #[test]
    fn test_room_expires_at_max_age() {
        let t = Utc::now();
        let policy = ExpirationPolicy::default();
        let room = room_created_at(t);
        let busy = activity(t + TimeDelta::minutes(9), 3);

        assert_eq!(policy.evaluate(&room, Some(&busy), t + TimeDelta::minutes(9)), None);
        assert_eq!(
            policy.evaluate(&room, Some(&busy), t + TimeDelta::minutes(10)),
            Some(ExpiryReason::MaxAge)
        );
    }

    #[test]
    fn test_lonely_room_expires_after_idle_timeout() {
        let t = Utc::now();
        let policy = ExpirationPolicy::default();
        let room = room_created_at(t);
        let lonely = activity(t, 1);

        assert_eq!(policy.evaluate(&room, Some(&lonely), t + TimeDelta::minutes(4)), None);
        assert_eq!(
            policy.evaluate(&room, Some(&lonely), t + TimeDelta::minutes(6)),
            Some(ExpiryReason::Idle)
        );
    }

    #[test]
    fn test_second_participant_exempts_from_idle_only() {
        let t = Utc::now();
        let policy = ExpirationPolicy::default();
        let room = room_created_at(t);
        let pair = activity(t, 2);

        assert_eq!(policy.evaluate(&room, Some(&pair), t + TimeDelta::minutes(7)), None);
        assert_eq!(
            policy.evaluate(&room, Some(&pair), t + TimeDelta::minutes(11)),
            Some(ExpiryReason::MaxAge)
        );
    }

    #[test]
    fn test_max_age_wins_when_both_apply() {
        let t = Utc::now();
        let policy = ExpirationPolicy::default();
        let room = room_created_at(t);
        let lonely = activity(t, 0);

        assert_eq!(
            policy.evaluate(&room, Some(&lonely), t + TimeDelta::minutes(20)),
            Some(ExpiryReason::MaxAge)
        );
    }

    #[test]
    fn test_ended_room_never_expires_again() {
        let t = Utc::now();
        let mut room = room_created_at(t);
        room.status = RoomStatus::Ended;

        assert_eq!(
            ExpirationPolicy::default().evaluate(&room, None, t + TimeDelta::hours(1)),
            None
        );
    }
}
