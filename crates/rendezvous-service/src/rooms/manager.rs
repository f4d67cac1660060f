//! Room Lifecycle Manager.
//!
//! Every operation reads authoritative rows from the store, decides, and
//! writes back. Nothing is committed locally before the store accepts it, so
//! a store failure leaves the room exactly as it was and the caller retries
//! the whole request.

use super::expiration::{ExpirationPolicy, ExpiryReason};
use super::model::{
    present_count, ParticipantStatus, Room, RoomActivity, RoomParticipant, RoomSnapshot,
    RoomStatus,
};
use super::password::{hash_password, verify_password};
use super::store::RoomStore;
use super::watch::{RoomChangeKind, RoomWatch};
use crate::errors::RvError;
use crate::observability::metrics;
use crate::presence::PresenceTracker;
use crate::signaling::relay::record_outcome;
use crate::signaling::{DropReason, RelayOutcome, SignalingRelay};
use chrono::{DateTime, Utc};
use common::signaling::{RelayPayload, ServerEvent};
use common::types::{AccountId, ConnectionId, GroupId, PairingId, RoomId};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Longest accepted room name, in characters.
pub const MAX_ROOM_NAME_LEN: usize = 100;

/// Result of a join attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Ok,
    WrongPassword,
    RoomEnded,
}

impl JoinOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinOutcome::Ok => "ok",
            JoinOutcome::WrongPassword => "wrong_password",
            JoinOutcome::RoomEnded => "room_ended",
        }
    }
}

/// Result of a host-only action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostActionOutcome {
    Ok,
    NotAuthorized,
}

/// Owns room lifecycle rules on top of a `RoomStore`.
pub struct RoomManager {
    store: Arc<dyn RoomStore>,
    relay: SignalingRelay,
    presence: PresenceTracker,
    watch: RoomWatch,
    policy: ExpirationPolicy,
    password_hash_cost: u32,
}

impl RoomManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn RoomStore>,
        relay: SignalingRelay,
        presence: PresenceTracker,
        watch: RoomWatch,
        policy: ExpirationPolicy,
        password_hash_cost: u32,
    ) -> Self {
        Self {
            store,
            relay,
            presence,
            watch,
            policy,
            password_hash_cost,
        }
    }

    #[must_use]
    pub fn watch(&self) -> &RoomWatch {
        &self.watch
    }

    #[must_use]
    pub fn policy(&self) -> ExpirationPolicy {
        self.policy
    }

    /// Create a room with the host joined and one counted participant.
    ///
    /// # Errors
    ///
    /// `BadRequest` for an empty or overlong name, `Store` on persistence
    /// failure.
    #[instrument(skip_all, name = "rv.rooms.create", fields(group_id = %group_id))]
    pub async fn create_room(
        &self,
        group_id: GroupId,
        host_id: AccountId,
        name: &str,
        password: Option<SecretString>,
    ) -> Result<Room, RvError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_ROOM_NAME_LEN {
            return Err(RvError::BadRequest(format!(
                "room name must be 1-{MAX_ROOM_NAME_LEN} characters"
            )));
        }

        let password_hash = match password {
            Some(password) => Some(hash_password(password, self.password_hash_cost).await?),
            None => None,
        };

        let now = Utc::now();
        let room = Room {
            id: RoomId::generate(),
            name: name.to_string(),
            group_id,
            host_id: host_id.clone(),
            password_hash,
            status: RoomStatus::Waiting,
            created_at: now,
            ended_at: None,
        };
        let host = RoomParticipant {
            room_id: room.id.clone(),
            user_id: host_id,
            status: ParticipantStatus::Joined,
            joined_at: now,
        };
        let activity = RoomActivity {
            room_id: room.id.clone(),
            last_active: now,
            participant_count: 1,
        };

        self.store.insert_room(&room, &host, &activity).await?;

        metrics::record_room_created();
        self.watch.publish(&room.id, RoomChangeKind::Created);
        info!(
            target: "rv.rooms.manager",
            room_id = %room.id,
            host_id = %room.host_id,
            has_password = room.has_password(),
            "Room created"
        );

        Ok(room)
    }

    /// Join a room.
    ///
    /// The password is checked before anything else and a failed check
    /// writes nothing. A previously kicked user may rejoin.
    ///
    /// # Errors
    ///
    /// `RoomNotFound`, or `Store`/`Internal` on persistence or hashing failure.
    #[instrument(skip_all, name = "rv.rooms.join", fields(room_id = %room_id))]
    pub async fn join_room(
        &self,
        room_id: &RoomId,
        user_id: &AccountId,
        password: Option<SecretString>,
    ) -> Result<JoinOutcome, RvError> {
        let room = self.load_room(room_id).await?;

        if let Some(hash) = room.password_hash.clone() {
            if !verify_password(password, hash).await? {
                metrics::record_room_join(JoinOutcome::WrongPassword.as_str());
                debug!(target: "rv.rooms.manager", room_id = %room_id, "Join rejected: wrong password");
                return Ok(JoinOutcome::WrongPassword);
            }
        }

        if room.status == RoomStatus::Ended {
            metrics::record_room_join(JoinOutcome::RoomEnded.as_str());
            return Ok(JoinOutcome::RoomEnded);
        }

        let now = Utc::now();
        let joined_at = match self.store.get_participant(room_id, user_id).await? {
            Some(existing) if existing.status.is_present() => existing.joined_at,
            _ => now,
        };
        self.store
            .upsert_participant(&RoomParticipant {
                room_id: room_id.clone(),
                user_id: user_id.clone(),
                status: ParticipantStatus::Joined,
                joined_at,
            })
            .await?;

        let count = self.sync_activity(room_id, Some(now)).await?;
        if count >= 2 && self.store.activate_room(room_id).await? {
            self.watch.publish(room_id, RoomChangeKind::Status);
            info!(target: "rv.rooms.manager", room_id = %room_id, "Room active");
        }

        metrics::record_room_join(JoinOutcome::Ok.as_str());
        self.watch.publish(room_id, RoomChangeKind::Participants);
        debug!(
            target: "rv.rooms.manager",
            room_id = %room_id,
            user_id = %user_id,
            participant_count = count,
            "Participant joined"
        );

        Ok(JoinOutcome::Ok)
    }

    /// Delete the caller's participant row.
    ///
    /// # Errors
    ///
    /// `RoomNotFound`, `ParticipantNotFound`, `Store`.
    #[instrument(skip_all, name = "rv.rooms.leave", fields(room_id = %room_id))]
    pub async fn leave_room(&self, room_id: &RoomId, user_id: &AccountId) -> Result<(), RvError> {
        self.load_room(room_id).await?;

        if !self.store.delete_participant(room_id, user_id).await? {
            return Err(RvError::ParticipantNotFound(user_id.to_string()));
        }

        let count = self.sync_activity(room_id, Some(Utc::now())).await?;
        self.watch.publish(room_id, RoomChangeKind::Participants);
        debug!(
            target: "rv.rooms.manager",
            room_id = %room_id,
            user_id = %user_id,
            participant_count = count,
            "Participant left"
        );
        Ok(())
    }

    /// Mark a present participant busy. The participant stays counted.
    ///
    /// # Errors
    ///
    /// `RoomNotFound`, `ParticipantNotFound` unless joined or busy, `Store`.
    #[instrument(skip_all, name = "rv.rooms.mark_busy", fields(room_id = %room_id))]
    pub async fn mark_busy(&self, room_id: &RoomId, user_id: &AccountId) -> Result<(), RvError> {
        self.load_room(room_id).await?;
        let mut participant = self.load_present_participant(room_id, user_id).await?;

        if participant.status == ParticipantStatus::Busy {
            return Ok(());
        }
        participant.status = ParticipantStatus::Busy;
        self.store.upsert_participant(&participant).await?;
        self.sync_activity(room_id, None).await?;

        self.watch.publish(room_id, RoomChangeKind::Participants);
        Ok(())
    }

    /// Invite a user who has no row yet.
    ///
    /// # Errors
    ///
    /// `RoomNotFound`, `Conflict` if the room has ended, `Store`.
    #[instrument(skip_all, name = "rv.rooms.invite", fields(room_id = %room_id))]
    pub async fn invite(
        &self,
        room_id: &RoomId,
        host_id: &AccountId,
        user_id: &AccountId,
    ) -> Result<HostActionOutcome, RvError> {
        let room = self.load_room(room_id).await?;
        if !self.authorize(&room, host_id, "invite") {
            return Ok(HostActionOutcome::NotAuthorized);
        }
        if !room.status.is_open() {
            return Err(RvError::Conflict("Room has ended".to_string()));
        }

        if self.store.get_participant(room_id, user_id).await?.is_none() {
            self.store
                .upsert_participant(&RoomParticipant {
                    room_id: room_id.clone(),
                    user_id: user_id.clone(),
                    status: ParticipantStatus::Invited,
                    joined_at: Utc::now(),
                })
                .await?;
            self.watch.publish(room_id, RoomChangeKind::Participants);
        }

        Ok(HostActionOutcome::Ok)
    }

    /// Remove a participant and notify their connections.
    ///
    /// # Errors
    ///
    /// `RoomNotFound`, `BadRequest` when the host targets themself,
    /// `ParticipantNotFound`, `Store`.
    #[instrument(skip_all, name = "rv.rooms.kick", fields(room_id = %room_id))]
    pub async fn kick(
        &self,
        room_id: &RoomId,
        host_id: &AccountId,
        user_id: &AccountId,
    ) -> Result<HostActionOutcome, RvError> {
        let room = self.load_room(room_id).await?;
        if !self.authorize(&room, host_id, "kick") {
            return Ok(HostActionOutcome::NotAuthorized);
        }
        if room.is_host(user_id) {
            return Err(RvError::BadRequest("Host cannot kick themself".to_string()));
        }

        let Some(mut participant) = self.store.get_participant(room_id, user_id).await? else {
            return Err(RvError::ParticipantNotFound(user_id.to_string()));
        };
        participant.status = ParticipantStatus::Kicked;
        self.store.upsert_participant(&participant).await?;
        self.sync_activity(room_id, None).await?;

        self.notify_account(
            user_id,
            &ServerEvent::RoomKicked {
                room_id: room_id.clone(),
            },
        )
        .await;
        self.watch.publish(room_id, RoomChangeKind::Participants);
        info!(target: "rv.rooms.manager", room_id = %room_id, user_id = %user_id, "Participant kicked");

        Ok(HostActionOutcome::Ok)
    }

    /// Ask a present participant's clients to mute. No row changes.
    ///
    /// # Errors
    ///
    /// `RoomNotFound`, `ParticipantNotFound` unless joined or busy, `Store`.
    #[instrument(skip_all, name = "rv.rooms.mute", fields(room_id = %room_id))]
    pub async fn mute(
        &self,
        room_id: &RoomId,
        host_id: &AccountId,
        user_id: &AccountId,
    ) -> Result<HostActionOutcome, RvError> {
        let room = self.load_room(room_id).await?;
        if !self.authorize(&room, host_id, "mute") {
            return Ok(HostActionOutcome::NotAuthorized);
        }
        self.load_present_participant(room_id, user_id).await?;

        self.notify_account(
            user_id,
            &ServerEvent::RoomMuted {
                room_id: room_id.clone(),
            },
        )
        .await;
        Ok(HostActionOutcome::Ok)
    }

    /// End the room now. Ending an ended room is a no-op.
    ///
    /// # Errors
    ///
    /// `RoomNotFound`, `Store`.
    #[instrument(skip_all, name = "rv.rooms.end", fields(room_id = %room_id))]
    pub async fn end_room(
        &self,
        room_id: &RoomId,
        host_id: &AccountId,
    ) -> Result<HostActionOutcome, RvError> {
        let room = self.load_room(room_id).await?;
        if !self.authorize(&room, host_id, "end") {
            return Ok(HostActionOutcome::NotAuthorized);
        }

        self.finish_room(room_id, Utc::now(), "host").await?;
        Ok(HostActionOutcome::Ok)
    }

    /// Refresh `last_active` for a chat message or similar activity.
    ///
    /// # Errors
    ///
    /// `RoomNotFound`, `Conflict` if the room has ended,
    /// `ParticipantNotFound` unless joined or busy, `Store`.
    #[instrument(skip_all, name = "rv.rooms.activity", fields(room_id = %room_id))]
    pub async fn record_activity(
        &self,
        room_id: &RoomId,
        user_id: &AccountId,
    ) -> Result<(), RvError> {
        let room = self.load_room(room_id).await?;
        if !room.status.is_open() {
            return Err(RvError::Conflict("Room has ended".to_string()));
        }
        self.load_present_participant(room_id, user_id).await?;

        self.sync_activity(room_id, Some(Utc::now())).await?;
        self.watch.publish(room_id, RoomChangeKind::Activity);
        Ok(())
    }

    /// Authoritative read of a room with its participants and activity.
    ///
    /// # Errors
    ///
    /// `RoomNotFound`, `Store`.
    pub async fn get_room(&self, room_id: &RoomId) -> Result<RoomSnapshot, RvError> {
        let room = self.load_room(room_id).await?;
        let participants = self.store.list_participants(room_id).await?;
        let activity = self.store.get_activity(room_id).await?;

        Ok(RoomSnapshot {
            has_password: room.has_password(),
            room,
            participants,
            activity,
        })
    }

    /// Relay a negotiation payload between two present members of an open
    /// room. The event's `from` carries the sender's account id, and its
    /// pairing id is the room link id for the two accounts.
    ///
    /// # Errors
    ///
    /// `Store` on persistence failure. Any other miss is a dropped outcome.
    #[instrument(skip_all, name = "rv.rooms.relay", fields(room_id = %room_id))]
    pub async fn relay_in_room(
        &self,
        room_id: &RoomId,
        from: &AccountId,
        to: &AccountId,
        payload: RelayPayload,
    ) -> Result<RelayOutcome, RvError> {
        let kind = payload.kind().as_str();

        let open = self
            .store
            .get_room(room_id)
            .await?
            .is_some_and(|room| room.status.is_open());
        let from_present = self.is_present(room_id, from).await?;
        let to_present = self.is_present(room_id, to).await?;

        if !(open && from_present && to_present) || from == to {
            debug!(
                target: "rv.signaling.relay",
                room_id = %room_id,
                from = %from,
                to = %to,
                kind,
                "Room relay miss: both users must be present in an open room"
            );
            let outcome = RelayOutcome::Dropped(DropReason::NotPaired);
            record_outcome(kind, outcome);
            return Ok(outcome);
        }

        let link_id = PairingId::for_room_link(room_id, from, to);
        let event = payload.into_event(ConnectionId::from(from.as_str()), link_id);

        let mut outcome = RelayOutcome::Dropped(DropReason::NoOutbox);
        for connection_id in self.presence.connections_of(to).await {
            let delivered = self.relay.deliver(&connection_id, event.clone()).await;
            if delivered.is_delivered() || !outcome.is_delivered() {
                outcome = delivered;
            }
        }

        record_outcome(kind, outcome);
        Ok(outcome)
    }

    /// End every open room the policy expires at `now`.
    ///
    /// A failure on one room is logged and does not stop the pass.
    ///
    /// # Errors
    ///
    /// `Store` if the open rooms cannot be listed.
    pub async fn sweep_expired_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(RoomId, ExpiryReason)>, RvError> {
        let open_rooms = self.store.list_open_rooms().await?;
        let mut expired = Vec::new();

        for (room, activity) in open_rooms {
            let Some(reason) = self.policy.evaluate(&room, activity.as_ref(), now) else {
                continue;
            };

            match self.finish_room(&room.id, now, reason.as_str()).await {
                Ok(true) => expired.push((room.id, reason)),
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        target: "rv.rooms.sweeper",
                        room_id = %room.id,
                        error = %e,
                        "Failed to expire room"
                    );
                }
            }
        }

        Ok(expired)
    }

    /// Mark the room ended and tell present participants. Returns whether
    /// this call ended it.
    async fn finish_room(
        &self,
        room_id: &RoomId,
        now: DateTime<Utc>,
        reason: &'static str,
    ) -> Result<bool, RvError> {
        if !self.store.end_room_if_open(room_id, now).await? {
            return Ok(false);
        }

        let event = ServerEvent::RoomEnded {
            room_id: room_id.clone(),
        };
        for participant in self.store.list_participants(room_id).await? {
            if participant.status.is_present() {
                self.notify_account(&participant.user_id, &event).await;
            }
        }

        metrics::record_room_ended(reason);
        self.watch.publish(room_id, RoomChangeKind::Status);
        info!(target: "rv.rooms.manager", room_id = %room_id, reason, "Room ended");
        Ok(true)
    }

    async fn load_room(&self, room_id: &RoomId) -> Result<Room, RvError> {
        self.store
            .get_room(room_id)
            .await?
            .ok_or_else(|| RvError::RoomNotFound(room_id.to_string()))
    }

    async fn load_present_participant(
        &self,
        room_id: &RoomId,
        user_id: &AccountId,
    ) -> Result<RoomParticipant, RvError> {
        match self.store.get_participant(room_id, user_id).await? {
            Some(participant) if participant.status.is_present() => Ok(participant),
            _ => Err(RvError::ParticipantNotFound(user_id.to_string())),
        }
    }

    async fn is_present(&self, room_id: &RoomId, user_id: &AccountId) -> Result<bool, RvError> {
        Ok(self
            .store
            .get_participant(room_id, user_id)
            .await?
            .is_some_and(|participant| participant.status.is_present()))
    }

    /// Recompute `participant_count` from participant rows and write the
    /// activity row. `last_active` moves only when `touched_at` is given.
    async fn sync_activity(
        &self,
        room_id: &RoomId,
        touched_at: Option<DateTime<Utc>>,
    ) -> Result<u32, RvError> {
        let participants = self.store.list_participants(room_id).await?;
        let participant_count = present_count(&participants);

        let last_active = match touched_at {
            Some(at) => at,
            None => self
                .store
                .get_activity(room_id)
                .await?
                .map_or_else(Utc::now, |activity| activity.last_active),
        };

        self.store
            .upsert_activity(&RoomActivity {
                room_id: room_id.clone(),
                last_active,
                participant_count,
            })
            .await?;
        Ok(participant_count)
    }

    fn authorize(&self, room: &Room, caller: &AccountId, action: &'static str) -> bool {
        if room.is_host(caller) {
            return true;
        }
        warn!(
            target: "rv.rooms.manager",
            room_id = %room.id,
            caller = %caller,
            action,
            "Host action rejected: caller is not the host"
        );
        false
    }

    async fn notify_account(&self, account_id: &AccountId, event: &ServerEvent) {
        for connection_id in self.presence.connections_of(account_id).await {
            let outcome = self.relay.deliver(&connection_id, event.clone()).await;
            record_outcome(event.label(), outcome);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::rooms::store::InMemoryRoomStore;
    use chrono::TimeDelta;
    use common::signaling::SessionDescription;

    struct Fixture {
        manager: RoomManager,
        store: Arc<InMemoryRoomStore>,
        presence: PresenceTracker,
        relay: SignalingRelay,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryRoomStore::new());
        let presence = PresenceTracker::new();
        let relay = SignalingRelay::new(16);
        let manager = RoomManager::new(
            Arc::clone(&store) as Arc<dyn RoomStore>,
            relay.clone(),
            presence.clone(),
            RoomWatch::default(),
            ExpirationPolicy::default(),
            4,
        );
        Fixture {
            manager,
            store,
            presence,
            relay,
        }
    }

    fn account(id: &str) -> AccountId {
        AccountId::from(id)
    }

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    async fn create(f: &Fixture, password: Option<&str>) -> Room {
        f.manager
            .create_room(GroupId::from("g1"), account("host"), "study", password.map(secret))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_room_writes_host_and_activity() {
        let f = fixture();
        let room = create(&f, None).await;

        let snapshot = f.manager.get_room(&room.id).await.unwrap();
        assert_eq!(snapshot.room.status, RoomStatus::Waiting);
        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(
            snapshot.participants.first().unwrap().status,
            ParticipantStatus::Joined
        );
        assert_eq!(snapshot.activity.unwrap().participant_count, 1);
    }

    #[tokio::test]
    async fn test_create_room_rejects_blank_name() {
        let f = fixture();
        let result = f
            .manager
            .create_room(GroupId::from("g1"), account("host"), "   ", None)
            .await;
        assert!(matches!(result, Err(RvError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_second_join_activates_room() {
        let f = fixture();
        let room = create(&f, None).await;

        let outcome = f.manager.join_room(&room.id, &account("guest"), None).await.unwrap();
        assert_eq!(outcome, JoinOutcome::Ok);

        let snapshot = f.manager.get_room(&room.id).await.unwrap();
        assert_eq!(snapshot.room.status, RoomStatus::Active);
        assert_eq!(snapshot.activity.unwrap().participant_count, 2);
    }

    #[tokio::test]
    async fn test_wrong_password_changes_nothing() {
        let f = fixture();
        let room = create(&f, Some("open sesame")).await;
        let before = f.manager.get_room(&room.id).await.unwrap();

        let outcome = f
            .manager
            .join_room(&room.id, &account("guest"), Some(secret("nope")))
            .await
            .unwrap();
        assert_eq!(outcome, JoinOutcome::WrongPassword);

        let missing = f
            .manager
            .join_room(&room.id, &account("guest"), None)
            .await
            .unwrap();
        assert_eq!(missing, JoinOutcome::WrongPassword);

        assert_eq!(f.manager.get_room(&room.id).await.unwrap(), before);

        let ok = f
            .manager
            .join_room(&room.id, &account("guest"), Some(secret("open sesame")))
            .await
            .unwrap();
        assert_eq!(ok, JoinOutcome::Ok);
    }

    #[tokio::test]
    async fn test_join_ended_room_fails() {
        let f = fixture();
        let room = create(&f, None).await;
        f.manager.end_room(&room.id, &account("host")).await.unwrap();

        let outcome = f.manager.join_room(&room.id, &account("guest"), None).await.unwrap();
        assert_eq!(outcome, JoinOutcome::RoomEnded);
    }

    #[tokio::test]
    async fn test_join_unknown_room_is_not_found() {
        let f = fixture();
        let result = f
            .manager
            .join_room(&RoomId::from("missing"), &account("guest"), None)
            .await;
        assert!(matches!(result, Err(RvError::RoomNotFound(_))));
    }

    #[tokio::test]
    async fn test_busy_keeps_participant_counted() {
        let f = fixture();
        let room = create(&f, None).await;
        f.manager.join_room(&room.id, &account("guest"), None).await.unwrap();

        f.manager.mark_busy(&room.id, &account("guest")).await.unwrap();

        let snapshot = f.manager.get_room(&room.id).await.unwrap();
        assert_eq!(snapshot.activity.unwrap().participant_count, 2);
    }

    #[tokio::test]
    async fn test_non_host_actions_are_rejected_without_changes() {
        let f = fixture();
        let room = create(&f, None).await;
        f.manager.join_room(&room.id, &account("guest"), None).await.unwrap();
        let before = f.manager.get_room(&room.id).await.unwrap();

        let guest = account("guest");
        assert_eq!(
            f.manager.kick(&room.id, &guest, &account("host")).await.unwrap(),
            HostActionOutcome::NotAuthorized
        );
        assert_eq!(
            f.manager.mute(&room.id, &guest, &account("host")).await.unwrap(),
            HostActionOutcome::NotAuthorized
        );
        assert_eq!(
            f.manager.invite(&room.id, &guest, &account("friend")).await.unwrap(),
            HostActionOutcome::NotAuthorized
        );
        assert_eq!(
            f.manager.end_room(&room.id, &guest).await.unwrap(),
            HostActionOutcome::NotAuthorized
        );

        assert_eq!(f.manager.get_room(&room.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_kick_notifies_and_uncounts() {
        let f = fixture();
        let room = create(&f, None).await;
        f.manager.join_room(&room.id, &account("guest"), None).await.unwrap();

        let conn = ConnectionId::from("guest-conn");
        f.presence.register(conn.clone(), Some(account("guest"))).await;
        let mut outbox = f.relay.register(conn).await;

        let outcome = f
            .manager
            .kick(&room.id, &account("host"), &account("guest"))
            .await
            .unwrap();
        assert_eq!(outcome, HostActionOutcome::Ok);
        assert_eq!(
            outbox.recv().await.unwrap(),
            ServerEvent::RoomKicked {
                room_id: room.id.clone()
            }
        );

        let snapshot = f.manager.get_room(&room.id).await.unwrap();
        assert_eq!(snapshot.activity.unwrap().participant_count, 1);

        // Kicked users may rejoin
        let rejoin = f.manager.join_room(&room.id, &account("guest"), None).await.unwrap();
        assert_eq!(rejoin, JoinOutcome::Ok);
    }

    #[tokio::test]
    async fn test_invite_only_adds_missing_rows() {
        let f = fixture();
        let room = create(&f, None).await;

        f.manager
            .invite(&room.id, &account("host"), &account("friend"))
            .await
            .unwrap();
        let row = f
            .store
            .get_participant(&room.id, &account("friend"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, ParticipantStatus::Invited);

        f.manager
            .invite(&room.id, &account("host"), &account("host"))
            .await
            .unwrap();
        let host = f
            .store
            .get_participant(&room.id, &account("host"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(host.status, ParticipantStatus::Joined);
    }

    #[tokio::test]
    async fn test_leave_deletes_row_and_recounts() {
        let f = fixture();
        let room = create(&f, None).await;
        f.manager.join_room(&room.id, &account("guest"), None).await.unwrap();

        f.manager.leave_room(&room.id, &account("guest")).await.unwrap();

        let snapshot = f.manager.get_room(&room.id).await.unwrap();
        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(snapshot.activity.unwrap().participant_count, 1);
        assert!(matches!(
            f.manager.leave_room(&room.id, &account("guest")).await,
            Err(RvError::ParticipantNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_expires_lonely_room_and_is_idempotent() {
        let f = fixture();
        let room = create(&f, None).await;
        let later = room.created_at + TimeDelta::minutes(6);

        let expired = f.manager.sweep_expired_at(later).await.unwrap();
        assert_eq!(expired, vec![(room.id.clone(), ExpiryReason::Idle)]);

        let stored = f.store.get_room(&room.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RoomStatus::Ended);
        assert_eq!(stored.ended_at, Some(later));

        assert!(f
            .manager
            .sweep_expired_at(later + TimeDelta::minutes(10))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_room_relay_requires_both_present() {
        let f = fixture();
        let room = create(&f, None).await;

        let conn = ConnectionId::from("guest-conn");
        f.presence.register(conn.clone(), Some(account("guest"))).await;
        let mut outbox = f.relay.register(conn).await;

        let offer = RelayPayload::Offer(SessionDescription::offer("v=0"));
        let miss = f
            .manager
            .relay_in_room(&room.id, &account("host"), &account("guest"), offer.clone())
            .await
            .unwrap();
        assert_eq!(miss, RelayOutcome::Dropped(DropReason::NotPaired));

        f.manager.join_room(&room.id, &account("guest"), None).await.unwrap();
        let hit = f
            .manager
            .relay_in_room(&room.id, &account("host"), &account("guest"), offer)
            .await
            .unwrap();
        assert_eq!(hit, RelayOutcome::Delivered);

        match outbox.recv().await.unwrap() {
            ServerEvent::Offer {
                from, pairing_id, ..
            } => {
                assert_eq!(from.as_str(), "host");
                assert_eq!(
                    pairing_id,
                    PairingId::for_room_link(&room.id, &account("guest"), &account("host"))
                );
            }
            other => unreachable!("expected offer, got {other:?}"),
        }
    }
}
