//! Mailbox messages for the matching coordinator actor.

use super::candidate::Candidate;
use crate::errors::RvError;
use crate::signaling::RelayOutcome;
use common::signaling::RelayPayload;
use common::types::{ConnectionId, PairingId};
use tokio::sync::oneshot;

/// Result of an enqueue (or of the re-enqueue performed by skip).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Paired immediately with a waiting candidate.
    Matched {
        pairing_id: PairingId,
        partner_id: ConnectionId,
        initiator: bool,
    },
    /// No compatible candidate; now waiting.
    Queued,
}

/// Like or dislike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rating {
    Like,
    Dislike,
}

impl Rating {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Rating::Like => "like",
            Rating::Dislike => "dislike",
        }
    }
}

/// Accumulated ratings for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RatingTally {
    pub likes: u64,
    pub dislikes: u64,
}

/// Snapshot of coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStatus {
    pub waiting: usize,
    pub active_pairings: usize,
    pub matches_formed: u64,
}

/// Messages processed by the coordinator, in mailbox order.
#[derive(Debug)]
pub enum CoordinatorMessage {
    Enqueue {
        candidate: Candidate,
        respond_to: oneshot::Sender<Result<EnqueueOutcome, RvError>>,
    },

    LeaveWaiting {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<bool>,
    },

    Skip {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Result<EnqueueOutcome, RvError>>,
    },

    Stop {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<()>,
    },

    Report {
        reporter: ConnectionId,
        reported: ConnectionId,
        reason: String,
        respond_to: oneshot::Sender<()>,
    },

    Relay {
        from: ConnectionId,
        to: ConnectionId,
        payload: RelayPayload,
        respond_to: oneshot::Sender<RelayOutcome>,
    },

    Rate {
        from: ConnectionId,
        target: ConnectionId,
        rating: Rating,
        respond_to: oneshot::Sender<RelayOutcome>,
    },

    Disconnect {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<()>,
    },

    PartnerOf {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Option<(PairingId, ConnectionId)>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<CoordinatorStatus>,
    },
}
