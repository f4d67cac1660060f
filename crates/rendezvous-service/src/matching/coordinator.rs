//! `MatchingCoordinator` - single-writer owner of the waiting pool and the
//! pairing table.
//!
//! Every mutation goes through the actor mailbox, so pairing formation is
//! atomic: two concurrent enqueues can never both be matched to the same
//! waiting candidate, and a waiting candidate is matched at most once.
//!
//! 1:1 relay delivery also runs inside the actor. Ending a pairing (skip,
//! stop, report, disconnect) removes it from the table before anything else
//! in the same message is processed, so no negotiation message tagged with an
//! old pairing id can be delivered after the skipper's re-enqueue becomes
//! observable.

use super::candidate::{Candidate, WaitingPool};
use super::messages::{
    CoordinatorMessage, CoordinatorStatus, EnqueueOutcome, Rating, RatingTally,
};
use super::pairing::{Pairing, PairingTable};
use crate::errors::RvError;
use crate::moderation::{ModerationSink, UserReport};
use crate::observability::metrics;
use crate::presence::PresenceTracker;
use crate::signaling::relay::record_outcome;
use crate::signaling::{DropReason, RelayOutcome, SignalingRelay};
use common::signaling::{RelayPayload, ServerEvent};
use common::types::{ConnectionId, PairingId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Mailbox capacity for the coordinator.
const COORDINATOR_CHANNEL_BUFFER: usize = 1000;

/// Handle to the `MatchingCoordinator` actor.
#[derive(Clone)]
pub struct MatchingCoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
}

impl MatchingCoordinatorHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> CoordinatorMessage,
    ) -> Result<T, RvError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| RvError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RvError::Internal(format!("response receive failed: {e}")))
    }

    /// Add a candidate to the waiting pool, matching it immediately if a
    /// compatible candidate is already waiting.
    ///
    /// Fails with `AlreadyWaiting` or `AlreadyPaired`.
    pub async fn enqueue(&self, candidate: Candidate) -> Result<EnqueueOutcome, RvError> {
        self.call(|respond_to| CoordinatorMessage::Enqueue {
            candidate,
            respond_to,
        })
        .await?
    }

    /// Leave the waiting pool. Idempotent; returns whether anything was removed.
    pub async fn leave_waiting(&self, connection_id: ConnectionId) -> Result<bool, RvError> {
        self.call(|respond_to| CoordinatorMessage::LeaveWaiting {
            connection_id,
            respond_to,
        })
        .await
    }

    /// End the current pairing (the partner gets `partner-left`) and
    /// re-enqueue with the last search request.
    pub async fn skip(&self, connection_id: ConnectionId) -> Result<EnqueueOutcome, RvError> {
        self.call(|respond_to| CoordinatorMessage::Skip {
            connection_id,
            respond_to,
        })
        .await?
    }

    /// Leave the pool and end the current pairing without re-enqueueing.
    pub async fn stop(&self, connection_id: ConnectionId) -> Result<(), RvError> {
        self.call(|respond_to| CoordinatorMessage::Stop {
            connection_id,
            respond_to,
        })
        .await
    }

    /// File a report. Ends the pairing when `reported` is the current partner.
    pub async fn report(
        &self,
        reporter: ConnectionId,
        reported: ConnectionId,
        reason: String,
    ) -> Result<(), RvError> {
        self.call(|respond_to| CoordinatorMessage::Report {
            reporter,
            reported,
            reason,
            respond_to,
        })
        .await
    }

    /// Relay a negotiation payload to the sender's current partner.
    pub async fn relay(
        &self,
        from: ConnectionId,
        to: ConnectionId,
        payload: RelayPayload,
    ) -> Result<RelayOutcome, RvError> {
        self.call(|respond_to| CoordinatorMessage::Relay {
            from,
            to,
            payload,
            respond_to,
        })
        .await
    }

    /// Like or dislike the current partner.
    pub async fn rate(
        &self,
        from: ConnectionId,
        target: ConnectionId,
        rating: Rating,
    ) -> Result<RelayOutcome, RvError> {
        self.call(|respond_to| CoordinatorMessage::Rate {
            from,
            target,
            rating,
            respond_to,
        })
        .await
    }

    /// Drop all state held for a connection and unregister its outbox.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), RvError> {
        self.call(|respond_to| CoordinatorMessage::Disconnect {
            connection_id,
            respond_to,
        })
        .await
    }

    /// Current pairing id and partner of a connection.
    pub async fn partner_of(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<(PairingId, ConnectionId)>, RvError> {
        self.call(|respond_to| CoordinatorMessage::PartnerOf {
            connection_id,
            respond_to,
        })
        .await
    }

    pub async fn status(&self) -> Result<CoordinatorStatus, RvError> {
        self.call(|respond_to| CoordinatorMessage::GetStatus { respond_to })
            .await
    }

    /// Cancel the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The coordinator actor. Owns all matching state.
pub struct MatchingCoordinator {
    receiver: mpsc::Receiver<CoordinatorMessage>,
    cancel_token: CancellationToken,
    relay: SignalingRelay,
    presence: PresenceTracker,
    moderation: Arc<dyn ModerationSink>,
    pool: WaitingPool,
    pairings: PairingTable,
    /// Most recent search request per connection, replayed by skip.
    last_requests: HashMap<ConnectionId, Candidate>,
    tallies: HashMap<ConnectionId, RatingTally>,
    matches_formed: u64,
    messages_processed: u64,
}

impl MatchingCoordinator {
    /// Spawn the coordinator and return its handle and task.
    ///
    /// The actor stops when `cancel_token` is cancelled or every handle is
    /// dropped.
    #[must_use]
    pub fn spawn(
        relay: SignalingRelay,
        presence: PresenceTracker,
        moderation: Arc<dyn ModerationSink>,
        cancel_token: CancellationToken,
    ) -> (MatchingCoordinatorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            relay,
            presence,
            moderation,
            pool: WaitingPool::new(),
            pairings: PairingTable::new(),
            last_requests: HashMap::new(),
            tallies: HashMap::new(),
            matches_formed: 0,
            messages_processed: 0,
        };

        let task = tokio::spawn(actor.run());

        (
            MatchingCoordinatorHandle {
                sender,
                cancel_token,
            },
            task,
        )
    }

    #[instrument(skip_all, name = "rv.matching.coordinator")]
    async fn run(mut self) {
        info!(target: "rv.matching.coordinator", "MatchingCoordinator started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rv.matching.coordinator",
                        "MatchingCoordinator received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.messages_processed += 1;
                        }
                        None => {
                            info!(
                                target: "rv.matching.coordinator",
                                "MatchingCoordinator channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rv.matching.coordinator",
            waiting = self.pool.len(),
            active_pairings = self.pairings.len(),
            matches_formed = self.matches_formed,
            messages_processed = self.messages_processed,
            "MatchingCoordinator stopped"
        );
    }

    async fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::Enqueue {
                candidate,
                respond_to,
            } => {
                let result = self.enqueue(candidate).await;
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::LeaveWaiting {
                connection_id,
                respond_to,
            } => {
                let removed = self.pool.remove(&connection_id).is_some();
                self.last_requests.remove(&connection_id);
                metrics::set_waiting_pool_size(self.pool.len());
                let _ = respond_to.send(removed);
            }

            CoordinatorMessage::Skip {
                connection_id,
                respond_to,
            } => {
                let result = self.skip(connection_id).await;
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::Stop {
                connection_id,
                respond_to,
            } => {
                self.end_pairing(&connection_id, "stop").await;
                self.pool.remove(&connection_id);
                self.last_requests.remove(&connection_id);
                metrics::set_waiting_pool_size(self.pool.len());
                let _ = respond_to.send(());
            }

            CoordinatorMessage::Report {
                reporter,
                reported,
                reason,
                respond_to,
            } => {
                self.report(reporter, reported, reason).await;
                let _ = respond_to.send(());
            }

            CoordinatorMessage::Relay {
                from,
                to,
                payload,
                respond_to,
            } => {
                let outcome = self.relay(from, to, payload).await;
                let _ = respond_to.send(outcome);
            }

            CoordinatorMessage::Rate {
                from,
                target,
                rating,
                respond_to,
            } => {
                let outcome = self.rate(&from, target, rating).await;
                let _ = respond_to.send(outcome);
            }

            CoordinatorMessage::Disconnect {
                connection_id,
                respond_to,
            } => {
                self.disconnect(&connection_id).await;
                let _ = respond_to.send(());
            }

            CoordinatorMessage::PartnerOf {
                connection_id,
                respond_to,
            } => {
                let current = self.pairings.pairing_of(&connection_id).and_then(|pairing| {
                    pairing
                        .partner_of(&connection_id)
                        .map(|partner| (pairing.id.clone(), partner.clone()))
                });
                let _ = respond_to.send(current);
            }

            CoordinatorMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(CoordinatorStatus {
                    waiting: self.pool.len(),
                    active_pairings: self.pairings.len(),
                    matches_formed: self.matches_formed,
                });
            }
        }
    }

    async fn enqueue(&mut self, candidate: Candidate) -> Result<EnqueueOutcome, RvError> {
        let connection_id = candidate.connection_id.clone();

        if self.pairings.is_paired(&connection_id) {
            return Err(RvError::AlreadyPaired);
        }
        if self.pool.contains(&connection_id) {
            return Err(RvError::AlreadyWaiting);
        }

        self.last_requests
            .insert(connection_id.clone(), candidate.clone());

        let outcome = match self.take_partner(&candidate).await {
            Some(partner) => self.form_pairing(candidate, partner).await,
            None => {
                self.pool.push(candidate);
                debug!(
                    target: "rv.matching.coordinator",
                    connection_id = %connection_id,
                    waiting = self.pool.len(),
                    "Candidate queued"
                );
                Ok(EnqueueOutcome::Queued)
            }
        };

        metrics::set_waiting_pool_size(self.pool.len());
        outcome
    }

    /// Remove and return the oldest compatible waiting candidate that is
    /// still connected. Disconnected candidates met along the way are evicted.
    async fn take_partner(&mut self, candidate: &Candidate) -> Option<Candidate> {
        loop {
            let waiting_id = self
                .pool
                .oldest_compatible(candidate)
                .map(|waiting| waiting.connection_id.clone())?;

            let waited = self.pool.waited(&waiting_id);
            let waiting = self.pool.remove(&waiting_id)?;
            if self.presence.is_connected(&waiting_id).await {
                if let Some(waited) = waited {
                    metrics::record_match_wait(waited);
                }
                return Some(waiting);
            }

            self.last_requests.remove(&waiting_id);
            metrics::record_pool_eviction();
            debug!(
                target: "rv.matching.coordinator",
                connection_id = %waiting_id,
                "Evicted offline candidate from pool"
            );
        }
    }

    async fn form_pairing(
        &mut self,
        candidate: Candidate,
        partner: Candidate,
    ) -> Result<EnqueueOutcome, RvError> {
        let pairing = Pairing::new(
            PairingId::generate(),
            candidate.connection_id.clone(),
            partner.connection_id.clone(),
        );
        let common_interests = candidate.common_interests(&partner);
        let initiator = pairing.initiator().clone();

        if !self.pairings.insert(pairing.clone()) {
            // Both sides were checked unpaired; put the partner back untouched
            self.pool.push(partner);
            return Err(RvError::Internal(
                "pairing member already paired".to_string(),
            ));
        }

        for (member, other) in [
            (&candidate.connection_id, &partner.connection_id),
            (&partner.connection_id, &candidate.connection_id),
        ] {
            let event = ServerEvent::MatchFound {
                partner_id: other.clone(),
                pairing_id: pairing.id.clone(),
                initiator: member == &initiator,
                common_interests: common_interests.clone(),
            };
            let outcome = self.relay.deliver(member, event).await;
            record_outcome("match-found", outcome);
        }

        self.matches_formed += 1;
        metrics::record_match_formed();
        metrics::set_active_pairings(self.pairings.len());

        info!(
            target: "rv.matching.coordinator",
            pairing_id = %pairing.id,
            initiator = %initiator,
            common_interests = common_interests.len(),
            "Pairing formed"
        );

        Ok(EnqueueOutcome::Matched {
            pairing_id: pairing.id.clone(),
            partner_id: partner.connection_id,
            initiator: candidate.connection_id == initiator,
        })
    }

    /// Remove the connection's pairing (if any) and tell the partner.
    async fn end_pairing(&mut self, connection_id: &ConnectionId, cause: &'static str) {
        let Some(pairing) = self.pairings.remove_by_member(connection_id) else {
            return;
        };

        if let Some(partner) = pairing.partner_of(connection_id) {
            let outcome = self
                .relay
                .deliver(
                    partner,
                    ServerEvent::PartnerLeft {
                        pairing_id: pairing.id.clone(),
                    },
                )
                .await;
            record_outcome("partner-left", outcome);
        }

        metrics::record_pairing_ended(cause);
        metrics::set_active_pairings(self.pairings.len());

        debug!(
            target: "rv.matching.coordinator",
            pairing_id = %pairing.id,
            connection_id = %connection_id,
            cause,
            lifetime_ms = u64::try_from(pairing.created_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Pairing ended"
        );
    }

    async fn skip(&mut self, connection_id: ConnectionId) -> Result<EnqueueOutcome, RvError> {
        self.end_pairing(&connection_id, "skip").await;
        self.pool.remove(&connection_id);

        let Some(request) = self.last_requests.get(&connection_id).cloned() else {
            metrics::set_waiting_pool_size(self.pool.len());
            return Err(RvError::NoSearchRequest);
        };

        self.enqueue(request).await
    }

    async fn report(&mut self, reporter: ConnectionId, reported: ConnectionId, reason: String) {
        let pairing_id = self
            .pairings
            .pairing_of(&reporter)
            .filter(|pairing| pairing.partner_of(&reporter) == Some(&reported))
            .map(|pairing| pairing.id.clone());

        let report = UserReport {
            reporter_account: self.presence.account_of(&reporter).await,
            reported_account: self.presence.account_of(&reported).await,
            reporter: reporter.clone(),
            reported,
            pairing_id: pairing_id.clone(),
            reason,
            reported_at: chrono::Utc::now(),
        };

        // Submitted off the actor loop
        let sink = Arc::clone(&self.moderation);
        tokio::spawn(async move {
            sink.submit(report).await;
        });

        if pairing_id.is_some() {
            self.end_pairing(&reporter, "report").await;
        } else {
            warn!(
                target: "rv.matching.coordinator",
                reporter = %reporter,
                "Report filed against a connection that is not the current partner"
            );
        }

        self.pool.remove(&reporter);
        self.last_requests.remove(&reporter);
        metrics::set_waiting_pool_size(self.pool.len());
    }

    async fn relay(
        &mut self,
        from: ConnectionId,
        to: ConnectionId,
        payload: RelayPayload,
    ) -> RelayOutcome {
        let kind = payload.kind().as_str();

        let pairing_id = self
            .pairings
            .pairing_of(&from)
            .filter(|pairing| pairing.partner_of(&from) == Some(&to))
            .map(|pairing| pairing.id.clone());

        let outcome = match pairing_id {
            Some(pairing_id) => {
                self.relay
                    .deliver(&to, payload.into_event(from, pairing_id))
                    .await
            }
            None => {
                debug!(
                    target: "rv.signaling.relay",
                    from = %from,
                    to = %to,
                    kind,
                    "Relay miss: sender and destination are not paired"
                );
                RelayOutcome::Dropped(DropReason::NotPaired)
            }
        };

        record_outcome(kind, outcome);
        outcome
    }

    async fn rate(
        &mut self,
        from: &ConnectionId,
        target: ConnectionId,
        rating: Rating,
    ) -> RelayOutcome {
        let is_partner = self
            .pairings
            .pairing_of(from)
            .and_then(|pairing| pairing.partner_of(from))
            == Some(&target);

        if !is_partner {
            debug!(
                target: "rv.matching.coordinator",
                from = %from,
                target_id = %target,
                rating = rating.as_str(),
                "Rating for a connection that is not the current partner dropped"
            );
            let outcome = RelayOutcome::Dropped(DropReason::NotPaired);
            record_outcome(rating.as_str(), outcome);
            return outcome;
        }

        let tally = self.tallies.entry(target.clone()).or_default();
        match rating {
            Rating::Like => tally.likes += 1,
            Rating::Dislike => tally.dislikes += 1,
        }
        let event = ServerEvent::UserStats {
            likes: tally.likes,
            dislikes: tally.dislikes,
        };

        let outcome = self.relay.deliver(&target, event).await;
        record_outcome(rating.as_str(), outcome);
        outcome
    }

    async fn disconnect(&mut self, connection_id: &ConnectionId) {
        self.end_pairing(connection_id, "disconnect").await;
        self.pool.remove(connection_id);
        self.last_requests.remove(connection_id);
        self.tallies.remove(connection_id);
        self.relay.unregister(connection_id).await;
        metrics::set_waiting_pool_size(self.pool.len());

        debug!(
            target: "rv.matching.coordinator",
            connection_id = %connection_id,
            "Connection state released"
        );
    }
}
