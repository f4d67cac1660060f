//! PostgreSQL room store.
//!
//! All queries are parameterized runtime queries. Row mapping uses
//! `try_get`, so a malformed row surfaces as a `StoreError` instead of a
//! panic.

use super::model::{ParticipantStatus, Room, RoomActivity, RoomParticipant, RoomStatus};
use super::store::RoomStore;
use crate::errors::StoreError;
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use common::types::{AccountId, GroupId, RoomId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Instant;
use tracing::instrument;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Room store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgRoomStore {
    pool: PgPool,
}

impl PgRoomStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations.
    ///
    /// # Errors
    ///
    /// `StoreError::Database` if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))
    }
}

/// Record the operation's duration and outcome, then convert the error.
fn observe<T>(
    operation: &'static str,
    start: Instant,
    result: Result<T, sqlx::Error>,
) -> Result<T, StoreError> {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::record_store_operation(operation, status, start.elapsed());
    result.map_err(StoreError::from)
}

fn room_from_row(row: &PgRow) -> Result<Room, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Room {
        id: RoomId::from_string(row.try_get::<String, _>("room_id")?),
        name: row.try_get("name")?,
        group_id: GroupId::from_string(row.try_get::<String, _>("group_id")?),
        host_id: AccountId::from_string(row.try_get::<String, _>("host_id")?),
        password_hash: row.try_get("password_hash")?,
        status: RoomStatus::from_db_str(&status)?,
        created_at: row.try_get("created_at")?,
        ended_at: row.try_get("ended_at")?,
    })
}

fn participant_from_row(row: &PgRow) -> Result<RoomParticipant, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(RoomParticipant {
        room_id: RoomId::from_string(row.try_get::<String, _>("room_id")?),
        user_id: AccountId::from_string(row.try_get::<String, _>("user_id")?),
        status: ParticipantStatus::from_db_str(&status)?,
        joined_at: row.try_get("joined_at")?,
    })
}

fn count_from_db(count: i32) -> Result<u32, StoreError> {
    u32::try_from(count)
        .map_err(|_| StoreError::CorruptRow(format!("negative participant_count {count}")))
}

fn count_to_db(count: u32) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

fn activity_from_row(row: &PgRow) -> Result<RoomActivity, StoreError> {
    Ok(RoomActivity {
        room_id: RoomId::from_string(row.try_get::<String, _>("room_id")?),
        last_active: row.try_get("last_active")?,
        participant_count: count_from_db(row.try_get("participant_count")?)?,
    })
}

#[async_trait::async_trait]
impl RoomStore for PgRoomStore {
    #[instrument(skip_all, name = "rv.store.insert_room")]
    async fn insert_room(
        &self,
        room: &Room,
        host: &RoomParticipant,
        activity: &RoomActivity,
    ) -> Result<(), StoreError> {
        let start = Instant::now();

        let result = async {
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r#"
                INSERT INTO rooms (
                    room_id, name, group_id, host_id, password_hash,
                    status, created_at, ended_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(room.id.as_str())
            .bind(&room.name)
            .bind(room.group_id.as_str())
            .bind(room.host_id.as_str())
            .bind(room.password_hash.as_deref())
            .bind(room.status.as_db_str())
            .bind(room.created_at)
            .bind(room.ended_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO room_participants (room_id, user_id, status, joined_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(host.room_id.as_str())
            .bind(host.user_id.as_str())
            .bind(host.status.as_db_str())
            .bind(host.joined_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO room_activity (room_id, last_active, participant_count)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(activity.room_id.as_str())
            .bind(activity.last_active)
            .bind(count_to_db(activity.participant_count))
            .execute(&mut *tx)
            .await?;

            tx.commit().await
        }
        .await;

        observe("insert_room", start, result)
    }

    #[instrument(skip_all, name = "rv.store.get_room")]
    async fn get_room(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError> {
        let start = Instant::now();
        let row = sqlx::query(
            r#"
            SELECT room_id, name, group_id, host_id, password_hash,
                   status, created_at, ended_at
            FROM rooms
            WHERE room_id = $1
            "#,
        )
        .bind(room_id.as_str())
        .fetch_optional(&self.pool)
        .await;

        observe("get_room", start, row)?
            .as_ref()
            .map(room_from_row)
            .transpose()
    }

    #[instrument(skip_all, name = "rv.store.activate_room")]
    async fn activate_room(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE rooms
            SET status = 'active'
            WHERE room_id = $1 AND status = 'waiting'
            "#,
        )
        .bind(room_id.as_str())
        .execute(&self.pool)
        .await;

        Ok(observe("activate_room", start, result)?.rows_affected() > 0)
    }

    #[instrument(skip_all, name = "rv.store.end_room")]
    async fn end_room_if_open(
        &self,
        room_id: &RoomId,
        ended_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE rooms
            SET status = 'ended', ended_at = $2
            WHERE room_id = $1 AND status IN ('waiting', 'active')
            "#,
        )
        .bind(room_id.as_str())
        .bind(ended_at)
        .execute(&self.pool)
        .await;

        Ok(observe("end_room", start, result)?.rows_affected() > 0)
    }

    #[instrument(skip_all, name = "rv.store.get_participant")]
    async fn get_participant(
        &self,
        room_id: &RoomId,
        user_id: &AccountId,
    ) -> Result<Option<RoomParticipant>, StoreError> {
        let start = Instant::now();
        let row = sqlx::query(
            r#"
            SELECT room_id, user_id, status, joined_at
            FROM room_participants
            WHERE room_id = $1 AND user_id = $2
            "#,
        )
        .bind(room_id.as_str())
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await;

        observe("get_participant", start, row)?
            .as_ref()
            .map(participant_from_row)
            .transpose()
    }

    #[instrument(skip_all, name = "rv.store.upsert_participant")]
    async fn upsert_participant(&self, participant: &RoomParticipant) -> Result<(), StoreError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO room_participants (room_id, user_id, status, joined_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (room_id, user_id)
            DO UPDATE SET status = EXCLUDED.status, joined_at = EXCLUDED.joined_at
            "#,
        )
        .bind(participant.room_id.as_str())
        .bind(participant.user_id.as_str())
        .bind(participant.status.as_db_str())
        .bind(participant.joined_at)
        .execute(&self.pool)
        .await;

        observe("upsert_participant", start, result).map(|_| ())
    }

    #[instrument(skip_all, name = "rv.store.delete_participant")]
    async fn delete_participant(
        &self,
        room_id: &RoomId,
        user_id: &AccountId,
    ) -> Result<bool, StoreError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            DELETE FROM room_participants
            WHERE room_id = $1 AND user_id = $2
            "#,
        )
        .bind(room_id.as_str())
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await;

        Ok(observe("delete_participant", start, result)?.rows_affected() > 0)
    }

    #[instrument(skip_all, name = "rv.store.list_participants")]
    async fn list_participants(&self, room_id: &RoomId) -> Result<Vec<RoomParticipant>, StoreError> {
        let start = Instant::now();
        let rows = sqlx::query(
            r#"
            SELECT room_id, user_id, status, joined_at
            FROM room_participants
            WHERE room_id = $1
            ORDER BY joined_at, user_id
            "#,
        )
        .bind(room_id.as_str())
        .fetch_all(&self.pool)
        .await;

        observe("list_participants", start, rows)?
            .iter()
            .map(participant_from_row)
            .collect()
    }

    #[instrument(skip_all, name = "rv.store.get_activity")]
    async fn get_activity(&self, room_id: &RoomId) -> Result<Option<RoomActivity>, StoreError> {
        let start = Instant::now();
        let row = sqlx::query(
            r#"
            SELECT room_id, last_active, participant_count
            FROM room_activity
            WHERE room_id = $1
            "#,
        )
        .bind(room_id.as_str())
        .fetch_optional(&self.pool)
        .await;

        observe("get_activity", start, row)?
            .as_ref()
            .map(activity_from_row)
            .transpose()
    }

    #[instrument(skip_all, name = "rv.store.upsert_activity")]
    async fn upsert_activity(&self, activity: &RoomActivity) -> Result<(), StoreError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO room_activity (room_id, last_active, participant_count)
            VALUES ($1, $2, $3)
            ON CONFLICT (room_id)
            DO UPDATE SET last_active = EXCLUDED.last_active,
                          participant_count = EXCLUDED.participant_count
            "#,
        )
        .bind(activity.room_id.as_str())
        .bind(activity.last_active)
        .bind(count_to_db(activity.participant_count))
        .execute(&self.pool)
        .await;

        observe("upsert_activity", start, result).map(|_| ())
    }

    #[instrument(skip_all, name = "rv.store.list_open_rooms")]
    async fn list_open_rooms(&self) -> Result<Vec<(Room, Option<RoomActivity>)>, StoreError> {
        let start = Instant::now();
        let rows = sqlx::query(
            r#"
            SELECT r.room_id, r.name, r.group_id, r.host_id, r.password_hash,
                   r.status, r.created_at, r.ended_at,
                   a.last_active, a.participant_count
            FROM rooms r
            LEFT JOIN room_activity a ON a.room_id = r.room_id
            WHERE r.status IN ('waiting', 'active')
            ORDER BY r.created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await;

        observe("list_open_rooms", start, rows)?
            .iter()
            .map(|row| -> Result<(Room, Option<RoomActivity>), StoreError> {
                let room = room_from_row(row)?;
                let last_active: Option<DateTime<Utc>> = row.try_get("last_active")?;
                let count: Option<i32> = row.try_get("participant_count")?;
                let activity = match (last_active, count) {
                    (Some(last_active), Some(count)) => Some(RoomActivity {
                        room_id: room.id.clone(),
                        last_active,
                        participant_count: count_from_db(count)?,
                    }),
                    _ => None,
                };
                Ok((room, activity))
            })
            .collect()
    }
}
