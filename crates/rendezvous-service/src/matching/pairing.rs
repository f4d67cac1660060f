//! Ephemeral 1:1 pairings.

use common::types::{ConnectionId, PairingId};
use std::collections::HashMap;
use tokio::time::Instant;

/// Two matched candidates during negotiation and connection.
#[derive(Debug, Clone)]
pub struct Pairing {
    pub id: PairingId,
    members: (ConnectionId, ConnectionId),
    pub created_at: Instant,
}

impl Pairing {
    /// Create a pairing. Members are stored initiator first.
    #[must_use]
    pub fn new(id: PairingId, a: ConnectionId, b: ConnectionId) -> Self {
        let members = if a <= b { (a, b) } else { (b, a) };
        Self {
            id,
            members,
            created_at: Instant::now(),
        }
    }

    /// The offer initiator: the lexicographically smaller connection id.
    #[must_use]
    pub fn initiator(&self) -> &ConnectionId {
        &self.members.0
    }

    #[must_use]
    pub fn members(&self) -> (&ConnectionId, &ConnectionId) {
        (&self.members.0, &self.members.1)
    }

    /// The other member, or `None` if `connection_id` is not in this pairing.
    #[must_use]
    pub fn partner_of(&self, connection_id: &ConnectionId) -> Option<&ConnectionId> {
        if &self.members.0 == connection_id {
            Some(&self.members.1)
        } else if &self.members.1 == connection_id {
            Some(&self.members.0)
        } else {
            None
        }
    }
}

/// Active pairings indexed by id and by member.
///
/// A connection belongs to at most one active pairing.
#[derive(Debug, Default)]
pub struct PairingTable {
    by_id: HashMap<PairingId, Pairing>,
    by_member: HashMap<ConnectionId, PairingId>,
}

impl PairingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    #[must_use]
    pub fn is_paired(&self, connection_id: &ConnectionId) -> bool {
        self.by_member.contains_key(connection_id)
    }

    /// Insert a pairing. Refuses (returns `false`) if either member is
    /// already paired.
    pub fn insert(&mut self, pairing: Pairing) -> bool {
        let (a, b) = pairing.members();
        if self.is_paired(a) || self.is_paired(b) {
            return false;
        }
        self.by_member.insert(a.clone(), pairing.id.clone());
        self.by_member.insert(b.clone(), pairing.id.clone());
        self.by_id.insert(pairing.id.clone(), pairing);
        true
    }

    /// Current pairing of a connection.
    #[must_use]
    pub fn pairing_of(&self, connection_id: &ConnectionId) -> Option<&Pairing> {
        self.by_member
            .get(connection_id)
            .and_then(|id| self.by_id.get(id))
    }

    /// Remove and return the pairing a connection belongs to.
    pub fn remove_by_member(&mut self, connection_id: &ConnectionId) -> Option<Pairing> {
        let id = self.by_member.get(connection_id)?.clone();
        let pairing = self.by_id.remove(&id)?;
        let (a, b) = pairing.members();
        self.by_member.remove(a);
        self.by_member.remove(b);
        Some(pairing)
    }
}
