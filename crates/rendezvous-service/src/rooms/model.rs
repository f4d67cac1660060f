//! Persisted room shapes.

use crate::errors::StoreError;
use chrono::{DateTime, Utc};
use common::types::{AccountId, GroupId, RoomId};
use serde::Serialize;

/// Room lifecycle status. Only ever advances: waiting, active, ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Active,
    Ended,
}

impl RoomStatus {
    #[must_use]
    pub const fn as_db_str(&self) -> &'static str {
        match self {
            RoomStatus::Waiting => "waiting",
            RoomStatus::Active => "active",
            RoomStatus::Ended => "ended",
        }
    }

    /// Parse the stored representation.
    ///
    /// # Errors
    ///
    /// `StoreError::CorruptRow` for unknown values.
    pub fn from_db_str(value: &str) -> Result<Self, StoreError> {
        match value {
            "waiting" => Ok(RoomStatus::Waiting),
            "active" => Ok(RoomStatus::Active),
            "ended" => Ok(RoomStatus::Ended),
            other => Err(StoreError::CorruptRow(format!(
                "unknown room status {other:?}"
            ))),
        }
    }

    /// Waiting or active.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        !matches!(self, RoomStatus::Ended)
    }

    /// Whether moving to `next` goes forward.
    #[must_use]
    pub fn can_advance_to(&self, next: RoomStatus) -> bool {
        next > *self
    }
}

/// Participant status within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Invited,
    Joined,
    Busy,
    Kicked,
}

impl ParticipantStatus {
    #[must_use]
    pub const fn as_db_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Invited => "invited",
            ParticipantStatus::Joined => "joined",
            ParticipantStatus::Busy => "busy",
            ParticipantStatus::Kicked => "kicked",
        }
    }

    /// Parse the stored representation.
    ///
    /// # Errors
    ///
    /// `StoreError::CorruptRow` for unknown values.
    pub fn from_db_str(value: &str) -> Result<Self, StoreError> {
        match value {
            "invited" => Ok(ParticipantStatus::Invited),
            "joined" => Ok(ParticipantStatus::Joined),
            "busy" => Ok(ParticipantStatus::Busy),
            "kicked" => Ok(ParticipantStatus::Kicked),
            other => Err(StoreError::CorruptRow(format!(
                "unknown participant status {other:?}"
            ))),
        }
    }

    /// Joined or busy: counted in `participant_count`.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, ParticipantStatus::Joined | ParticipantStatus::Busy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub group_id: GroupId,
    /// Immutable after creation.
    pub host_id: AccountId,
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub status: RoomStatus,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Room {
    #[must_use]
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    #[must_use]
    pub fn is_host(&self, account_id: &AccountId) -> bool {
        &self.host_id == account_id
    }
}

/// At most one row per (room, user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomParticipant {
    pub room_id: RoomId,
    pub user_id: AccountId,
    pub status: ParticipantStatus,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomActivity {
    pub room_id: RoomId,
    pub last_active: DateTime<Utc>,
    /// Cached count of joined or busy participants.
    pub participant_count: u32,
}

/// Authoritative view of one room returned by reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room: Room,
    pub has_password: bool,
    pub participants: Vec<RoomParticipant>,
    pub activity: Option<RoomActivity>,
}

/// Count participants that are joined or busy.
#[must_use]
pub fn present_count(participants: &[RoomParticipant]) -> u32 {
    let present = participants
        .iter()
        .filter(|participant| participant.status.is_present())
        .count();
    u32::try_from(present).unwrap_or(u32::MAX)
}
