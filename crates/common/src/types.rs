//! Common data types for Rendezvous components.
//!
//! Identifiers are string newtypes. Ordering is plain lexicographic byte
//! ordering of the underlying string, which the initiator tie-break relies on.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            #[must_use]
            pub fn from_string(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the identifier, returning the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of one signaling connection. Reassigned on every reconnect.
    ConnectionId
);

string_id!(
    /// Stable account identifier (survives reconnects).
    AccountId
);

string_id!(
    /// Identifier of an ephemeral 1:1 pairing, or of a room link.
    PairingId
);

string_id!(
    /// Identifier of a persistent room.
    RoomId
);

string_id!(
    /// Identifier of the group that owns a room.
    GroupId
);

impl ConnectionId {
    /// Allocate a fresh random connection identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl PairingId {
    /// Allocate a fresh random pairing identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Deterministic identifier for the negotiation link between two room
    /// members. Both sides derive the same value regardless of argument order.
    #[must_use]
    pub fn for_room_link(room_id: &RoomId, a: &AccountId, b: &AccountId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("room:{room_id}:{low}:{high}"))
    }
}

impl RoomId {
    /// Allocate a fresh random room identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_order_lexicographically() {
        let abc = ConnectionId::from("abc");
        let xyz = ConnectionId::from("xyz");
        assert!(abc < xyz);
        assert_eq!(abc.clone().min(xyz.clone()), abc);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(ConnectionId::generate(), ConnectionId::generate());
        assert_ne!(PairingId::generate(), PairingId::generate());
        assert_ne!(RoomId::generate(), RoomId::generate());
    }

    #[test]
    fn test_room_link_is_symmetric() {
        let room = RoomId::from("room-1");
        let alice = AccountId::from("alice");
        let bob = AccountId::from("bob");

        let forward = PairingId::for_room_link(&room, &alice, &bob);
        let backward = PairingId::for_room_link(&room, &bob, &alice);
        assert_eq!(forward, backward);
        assert_eq!(forward.as_str(), "room:room-1:alice:bob");
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = RoomId::from("r-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"r-42\"");
        let back: RoomId = serde_json::from_str("\"r-42\"").unwrap();
        assert_eq!(back, id);
    }
}
