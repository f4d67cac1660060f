//! ICE candidate buffering.
//!
//! Candidates routinely arrive before the remote description they belong to
//! has been applied. Applying them early is invalid, so they are queued per
//! pairing and handed back in receipt order once the description is set.

use common::signaling::IceCandidate;
use common::types::PairingId;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
struct CandidateQueue {
    remote_applied: bool,
    pending: VecDeque<IceCandidate>,
}

/// Per-pairing queue of candidates awaiting a remote description.
#[derive(Debug, Default)]
pub struct IceCandidateBuffer {
    queues: HashMap<PairingId, CandidateQueue>,
}

impl IceCandidateBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a received candidate.
    ///
    /// Returns the candidate back when the remote description is already
    /// applied (the caller applies it immediately), otherwise queues it and
    /// returns `None`.
    pub fn add_candidate(
        &mut self,
        pairing_id: &PairingId,
        candidate: IceCandidate,
    ) -> Option<IceCandidate> {
        let queue = self.queues.entry(pairing_id.clone()).or_default();
        if queue.remote_applied {
            Some(candidate)
        } else {
            queue.pending.push_back(candidate);
            None
        }
    }

    /// Mark the remote description as applied and drain the queue in
    /// receipt order. Later candidates for this pairing pass straight through
    /// `add_candidate`.
    pub fn flush(&mut self, pairing_id: &PairingId) -> Vec<IceCandidate> {
        let queue = self.queues.entry(pairing_id.clone()).or_default();
        queue.remote_applied = true;
        queue.pending.drain(..).collect()
    }

    /// Forget a pairing, dropping anything still queued.
    pub fn discard(&mut self, pairing_id: &PairingId) -> usize {
        self.queues
            .remove(pairing_id)
            .map_or(0, |queue| queue.pending.len())
    }

    #[must_use]
    pub fn pending(&self, pairing_id: &PairingId) -> usize {
        self.queues
            .get(pairing_id)
            .map_or(0, |queue| queue.pending.len())
    }

    #[must_use]
    pub fn is_remote_applied(&self, pairing_id: &PairingId) -> bool {
        self.queues
            .get(pairing_id)
            .is_some_and(|queue| queue.remote_applied)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate::new(format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000 typ host"))
    }

    #[test]
    fn test_candidates_before_description_flush_in_receipt_order() {
        let mut buffer = IceCandidateBuffer::new();
        let pairing = PairingId::from("p-1");

        for n in 1..=4 {
            assert!(buffer.add_candidate(&pairing, candidate(n)).is_none());
        }
        assert_eq!(buffer.pending(&pairing), 4);

        let flushed = buffer.flush(&pairing);
        assert_eq!(flushed, (1..=4).map(candidate).collect::<Vec<_>>());
        assert_eq!(buffer.pending(&pairing), 0);
    }

    #[test]
    fn test_candidates_after_description_apply_immediately() {
        let mut buffer = IceCandidateBuffer::new();
        let pairing = PairingId::from("p-1");

        assert!(buffer.flush(&pairing).is_empty());
        assert!(buffer.is_remote_applied(&pairing));
        assert_eq!(buffer.add_candidate(&pairing, candidate(7)), Some(candidate(7)));
        assert_eq!(buffer.pending(&pairing), 0);
    }

    #[test]
    fn test_pairings_are_isolated() {
        let mut buffer = IceCandidateBuffer::new();
        let first = PairingId::from("p-1");
        let second = PairingId::from("p-2");

        buffer.add_candidate(&first, candidate(1));
        buffer.flush(&second);

        assert_eq!(buffer.pending(&first), 1);
        assert!(!buffer.is_remote_applied(&first));
        assert_eq!(buffer.add_candidate(&second, candidate(2)), Some(candidate(2)));
    }

    #[test]
    fn test_discard_drops_pending_candidates() {
        let mut buffer = IceCandidateBuffer::new();
        let pairing = PairingId::from("p-1");

        buffer.add_candidate(&pairing, candidate(1));
        buffer.add_candidate(&pairing, candidate(2));

        assert_eq!(buffer.discard(&pairing), 2);
        assert_eq!(buffer.pending(&pairing), 0);
        assert!(!buffer.is_remote_applied(&pairing));
    }
}
