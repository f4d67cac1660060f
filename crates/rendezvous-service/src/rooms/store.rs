//! Room persistence seam.
//!
//! `RoomStore` is the only way the manager touches room rows. Every write
//! is a single-row upsert or a conditional update, so concurrent writers
//! resolve per row.

use super::model::{Room, RoomActivity, RoomParticipant, RoomStatus};
use crate::errors::StoreError;
use chrono::{DateTime, Utc};
use common::types::{AccountId, RoomId};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Persistent store for rooms, participants and activity.
#[async_trait::async_trait]
pub trait RoomStore: Send + Sync {
    /// Store a new room with its host participant and initial activity.
    async fn insert_room(
        &self,
        room: &Room,
        host: &RoomParticipant,
        activity: &RoomActivity,
    ) -> Result<(), StoreError>;

    async fn get_room(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError>;

    /// Move a waiting room to active. Returns whether the row changed.
    async fn activate_room(&self, room_id: &RoomId) -> Result<bool, StoreError>;

    /// End a waiting or active room. Returns whether the row changed, so
    /// repeating it on an ended room is a no-op.
    async fn end_room_if_open(
        &self,
        room_id: &RoomId,
        ended_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn get_participant(
        &self,
        room_id: &RoomId,
        user_id: &AccountId,
    ) -> Result<Option<RoomParticipant>, StoreError>;

    /// Insert or replace the single row for (room, user).
    async fn upsert_participant(&self, participant: &RoomParticipant) -> Result<(), StoreError>;

    /// Returns whether a row was deleted.
    async fn delete_participant(
        &self,
        room_id: &RoomId,
        user_id: &AccountId,
    ) -> Result<bool, StoreError>;

    async fn list_participants(&self, room_id: &RoomId) -> Result<Vec<RoomParticipant>, StoreError>;

    async fn get_activity(&self, room_id: &RoomId) -> Result<Option<RoomActivity>, StoreError>;

    async fn upsert_activity(&self, activity: &RoomActivity) -> Result<(), StoreError>;

    /// Waiting and active rooms with their activity rows.
    async fn list_open_rooms(&self) -> Result<Vec<(Room, Option<RoomActivity>)>, StoreError>;
}

#[derive(Debug, Default)]
struct Tables {
    rooms: HashMap<RoomId, Room>,
    participants: BTreeMap<(RoomId, AccountId), RoomParticipant>,
    activity: HashMap<RoomId, RoomActivity>,
}

/// Process-local store used when no database is configured.
#[derive(Debug, Default)]
pub struct InMemoryRoomStore {
    tables: RwLock<Tables>,
}

impl InMemoryRoomStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RoomStore for InMemoryRoomStore {
    async fn insert_room(
        &self,
        room: &Room,
        host: &RoomParticipant,
        activity: &RoomActivity,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.rooms.contains_key(&room.id) {
            return Err(StoreError::Database(format!(
                "duplicate room id {}",
                room.id
            )));
        }
        tables.rooms.insert(room.id.clone(), room.clone());
        tables.participants.insert(
            (host.room_id.clone(), host.user_id.clone()),
            host.clone(),
        );
        tables.activity.insert(room.id.clone(), activity.clone());
        Ok(())
    }

    async fn get_room(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError> {
        Ok(self.tables.read().await.rooms.get(room_id).cloned())
    }

    async fn activate_room(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.rooms.get_mut(room_id) {
            Some(room) if room.status.can_advance_to(RoomStatus::Active) => {
                room.status = RoomStatus::Active;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn end_room_if_open(
        &self,
        room_id: &RoomId,
        ended_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.rooms.get_mut(room_id) {
            Some(room) if room.status.can_advance_to(RoomStatus::Ended) => {
                room.status = RoomStatus::Ended;
                room.ended_at = Some(ended_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_participant(
        &self,
        room_id: &RoomId,
        user_id: &AccountId,
    ) -> Result<Option<RoomParticipant>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .participants
            .get(&(room_id.clone(), user_id.clone()))
            .cloned())
    }

    async fn upsert_participant(&self, participant: &RoomParticipant) -> Result<(), StoreError> {
        self.tables.write().await.participants.insert(
            (participant.room_id.clone(), participant.user_id.clone()),
            participant.clone(),
        );
        Ok(())
    }

    async fn delete_participant(
        &self,
        room_id: &RoomId,
        user_id: &AccountId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .write()
            .await
            .participants
            .remove(&(room_id.clone(), user_id.clone()))
            .is_some())
    }

    async fn list_participants(&self, room_id: &RoomId) -> Result<Vec<RoomParticipant>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<RoomParticipant> = tables
            .participants
            .values()
            .filter(|participant| &participant.room_id == room_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(rows)
    }

    async fn get_activity(&self, room_id: &RoomId) -> Result<Option<RoomActivity>, StoreError> {
        Ok(self.tables.read().await.activity.get(room_id).cloned())
    }

    async fn upsert_activity(&self, activity: &RoomActivity) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .activity
            .insert(activity.room_id.clone(), activity.clone());
        Ok(())
    }

    async fn list_open_rooms(&self) -> Result<Vec<(Room, Option<RoomActivity>)>, StoreError> {
        let tables = self.tables.read().await;
        let mut open: Vec<(Room, Option<RoomActivity>)> = tables
            .rooms
            .values()
            .filter(|room| room.status.is_open())
            .map(|room| (room.clone(), tables.activity.get(&room.id).cloned()))
            .collect();
        open.sort_by(|a, b| a.0.created_at.cmp(&b.0.created_at));
        Ok(open)
    }
}
