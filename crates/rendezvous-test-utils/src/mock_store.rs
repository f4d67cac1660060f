//! Room store that can be switched into a failing state.

use chrono::{DateTime, Utc};
use common::types::{AccountId, RoomId};
use rendezvous_service::errors::StoreError;
use rendezvous_service::rooms::{
    InMemoryRoomStore, Room, RoomActivity, RoomParticipant, RoomStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// In-memory store whose every operation fails with
/// `StoreError::Database` while the failure switch is on.
#[derive(Clone, Default)]
pub struct FailingRoomStore {
    inner: Arc<InMemoryRoomStore>,
    failing: Arc<AtomicBool>,
}

impl FailingRoomStore {
    /// A store that works until `set_failing(true)`.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that fails from the first call.
    pub fn always_failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Database("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl RoomStore for FailingRoomStore {
    async fn insert_room(
        &self,
        room: &Room,
        host: &RoomParticipant,
        activity: &RoomActivity,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.insert_room(room, host, activity).await
    }

    async fn get_room(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError> {
        self.check()?;
        self.inner.get_room(room_id).await
    }

    async fn activate_room(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.activate_room(room_id).await
    }

    async fn end_room_if_open(
        &self,
        room_id: &RoomId,
        ended_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.end_room_if_open(room_id, ended_at).await
    }

    async fn get_participant(
        &self,
        room_id: &RoomId,
        user_id: &AccountId,
    ) -> Result<Option<RoomParticipant>, StoreError> {
        self.check()?;
        self.inner.get_participant(room_id, user_id).await
    }

    async fn upsert_participant(&self, participant: &RoomParticipant) -> Result<(), StoreError> {
        self.check()?;
        self.inner.upsert_participant(participant).await
    }

    async fn delete_participant(
        &self,
        room_id: &RoomId,
        user_id: &AccountId,
    ) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.delete_participant(room_id, user_id).await
    }

    async fn list_participants(
        &self,
        room_id: &RoomId,
    ) -> Result<Vec<RoomParticipant>, StoreError> {
        self.check()?;
        self.inner.list_participants(room_id).await
    }

    async fn get_activity(&self, room_id: &RoomId) -> Result<Option<RoomActivity>, StoreError> {
        self.check()?;
        self.inner.get_activity(room_id).await
    }

    async fn upsert_activity(&self, activity: &RoomActivity) -> Result<(), StoreError> {
        self.check()?;
        self.inner.upsert_activity(activity).await
    }

    async fn list_open_rooms(&self) -> Result<Vec<(Room, Option<RoomActivity>)>, StoreError> {
        self.check()?;
        self.inner.list_open_rooms().await
    }
}
