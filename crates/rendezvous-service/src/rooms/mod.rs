//! Persistent multi-participant rooms.
//!
//! - [`manager`] - create/join/leave/host actions and room-scoped relay
//! - [`expiration`] - the expiry predicates
//! - [`sweeper`] - the recurring task that applies them
//! - [`store`] / [`postgres`] - persistence behind the `RoomStore` trait
//! - [`watch`] - change notifications

pub mod expiration;
pub mod manager;
pub mod model;
pub mod password;
pub mod postgres;
pub mod store;
pub mod sweeper;
pub mod watch;

pub use expiration::{ExpirationPolicy, ExpiryReason};
pub use manager::{HostActionOutcome, JoinOutcome, RoomManager};
pub use model::{ParticipantStatus, Room, RoomActivity, RoomParticipant, RoomSnapshot, RoomStatus};
pub use postgres::PgRoomStore;
pub use store::{InMemoryRoomStore, RoomStore};
pub use sweeper::start_room_sweeper;
pub use watch::{RoomChange, RoomChangeKind, RoomNotification, RoomSubscription, RoomWatch};
