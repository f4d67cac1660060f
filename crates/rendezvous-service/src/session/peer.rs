//! Client-side driver for one peer session.
//!
//! `PeerSession` feeds server events and local transport callbacks through
//! the transition table and performs the resulting effects: acquiring and
//! releasing capture, building and closing the transport, and sending
//! signaling frames.

use super::machine::{transition, PeerState, SessionInput};
use super::transport::{LocalStream, MediaCapture, MediaTransport, TransportFactory, TransportState};
use crate::errors::{NegotiationError, SessionError};
use crate::signaling::IceCandidateBuffer;
use common::signaling::{ClientMessage, IceCandidate, ServerEvent, SessionDescription, WaitingRequest};
use common::types::{ConnectionId, PairingId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

struct PeerLink<T> {
    pairing_id: PairingId,
    partner_id: ConnectionId,
    transport: T,
    local_set: bool,
    remote_set: bool,
    candidates_exchanged: usize,
}

impl<T> PeerLink<T> {
    fn is_negotiated(&self) -> bool {
        self.local_set && self.remote_set && self.candidates_exchanged > 0
    }
}

/// One client's session state and its live transport.
pub struct PeerSession<C, F>
where
    C: MediaCapture,
    F: TransportFactory,
{
    state: PeerState,
    capture: C,
    factory: F,
    outbound: mpsc::Sender<ClientMessage>,
    /// Last search request, replayed when the partner leaves.
    request: Option<WaitingRequest>,
    stream: Option<LocalStream>,
    link: Option<PeerLink<F::Transport>>,
    candidates: IceCandidateBuffer,
}

impl<C, F> PeerSession<C, F>
where
    C: MediaCapture,
    F: TransportFactory,
{
    /// Create an idle session that sends frames on `outbound`.
    pub fn new(capture: C, factory: F, outbound: mpsc::Sender<ClientMessage>) -> Self {
        Self {
            state: PeerState::Idle,
            capture,
            factory,
            outbound,
            request: None,
            stream: None,
            link: None,
            candidates: IceCandidateBuffer::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> PeerState {
        self.state
    }

    #[must_use]
    pub fn pairing_id(&self) -> Option<&PairingId> {
        self.link.as_ref().map(|link| &link.pairing_id)
    }

    #[must_use]
    pub fn partner_id(&self) -> Option<&ConnectionId> {
        self.link.as_ref().map(|link| &link.partner_id)
    }

    /// Acquire capture and start searching.
    ///
    /// # Errors
    ///
    /// `Capture` if local media cannot be acquired (the session stays Idle),
    /// `IllegalTransition` unless Idle.
    pub async fn start(&mut self, request: WaitingRequest) -> Result<(), SessionError> {
        let (next, _) = transition(self.state, SessionInput::Start)?;

        if self.stream.is_none() {
            let stream = self.capture.acquire().await?;
            debug!(target: "rv.session", stream_id = %stream.id, "Local media acquired");
            self.stream = Some(stream);
        }

        self.state = next;
        self.request = Some(request.clone());
        self.send(ClientMessage::Waiting(request)).await
    }

    /// Apply an event received from the service.
    ///
    /// Negotiation messages for any pairing other than the current one are
    /// discarded.
    ///
    /// # Errors
    ///
    /// `Negotiation` when the transport rejects a step (the session has
    /// already been forced to Idle), `IllegalTransition` for out-of-order
    /// events, `ChannelClosed` if the signaling channel is gone.
    pub async fn handle_server_event(&mut self, event: ServerEvent) -> Result<(), SessionError> {
        match event {
            ServerEvent::MatchFound {
                partner_id,
                pairing_id,
                initiator,
                ..
            } => self.on_match_found(partner_id, pairing_id, initiator).await,

            ServerEvent::Offer {
                offer,
                from,
                pairing_id,
            } => {
                if !self.is_current(&from, &pairing_id) {
                    self.discard("offer", &from, &pairing_id);
                    return Ok(());
                }
                match self.apply_remote_offer(offer).await {
                    Ok(answer) => {
                        self.send(ClientMessage::Answer {
                            answer,
                            to: from.into_inner(),
                            room_id: None,
                        })
                        .await?;
                        self.check_negotiated()
                    }
                    Err(e) => self.fail_negotiation(e).await,
                }
            }

            ServerEvent::Answer {
                answer,
                from,
                pairing_id,
            } => {
                if !self.is_current(&from, &pairing_id) {
                    self.discard("answer", &from, &pairing_id);
                    return Ok(());
                }
                match self.apply_remote_answer(answer).await {
                    Ok(()) => self.check_negotiated(),
                    Err(e) => self.fail_negotiation(e).await,
                }
            }

            ServerEvent::IceCandidate {
                candidate,
                from,
                pairing_id,
            } => {
                if !self.is_current(&from, &pairing_id) {
                    self.discard("ice-candidate", &from, &pairing_id);
                    return Ok(());
                }
                match self.apply_remote_candidate(candidate).await {
                    Ok(()) => self.check_negotiated(),
                    Err(e) => self.fail_negotiation(e).await,
                }
            }

            ServerEvent::PartnerLeft { pairing_id } => {
                if self.pairing_id() != Some(&pairing_id) {
                    debug!(
                        target: "rv.session",
                        pairing_id = %pairing_id,
                        "Ignoring partner-left for a stale pairing"
                    );
                    return Ok(());
                }
                self.advance(SessionInput::PartnerLeft)?;
                self.teardown().await;
                match self.request.clone() {
                    Some(request) => self.send(ClientMessage::Waiting(request)).await,
                    None => Ok(()),
                }
            }

            _ => Ok(()),
        }
    }

    /// Send a locally gathered candidate to the partner.
    ///
    /// # Errors
    ///
    /// `IllegalTransition` unless negotiating or connected.
    pub async fn on_local_candidate(&mut self, candidate: IceCandidate) -> Result<(), SessionError> {
        self.advance(SessionInput::NegotiationProgress)?;

        let Some(link) = self.link.as_mut() else {
            return Ok(());
        };
        link.candidates_exchanged += 1;
        let to = link.partner_id.as_str().to_string();

        self.send(ClientMessage::IceCandidate {
            candidate,
            to,
            room_id: None,
        })
        .await?;
        self.check_negotiated()
    }

    /// React to a transport connectivity change.
    ///
    /// A lost transport tears the pairing down and searches again.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` if the skip cannot be sent.
    pub async fn on_transport_state(&mut self, state: TransportState) -> Result<(), SessionError> {
        if !state.is_lost() || !self.state.has_transport() {
            return Ok(());
        }

        warn!(
            target: "rv.session",
            pairing_id = ?self.pairing_id().map(PairingId::as_str),
            transport_state = ?state,
            "Peer transport lost"
        );
        self.advance(SessionInput::TransportLost)?;
        self.teardown().await;
        self.send(ClientMessage::Skip).await
    }

    /// Leave the current partner (or keep waiting) and search again.
    ///
    /// # Errors
    ///
    /// `IllegalTransition` when Idle or Ended.
    pub async fn skip(&mut self) -> Result<(), SessionError> {
        self.advance(SessionInput::Skip)?;
        self.teardown().await;
        self.send(ClientMessage::Skip).await
    }

    /// Report the current partner and go Idle.
    ///
    /// # Errors
    ///
    /// `IllegalTransition` unless negotiating or connected.
    pub async fn report(&mut self, reason: impl Into<String>) -> Result<(), SessionError> {
        let partner = self.partner_id().cloned();
        self.advance(SessionInput::Report)?;
        self.teardown().await;
        self.release_capture().await;

        match partner {
            Some(reported_user) => {
                self.send(ClientMessage::Report {
                    reported_user,
                    reason: reason.into(),
                })
                .await
            }
            None => Ok(()),
        }
    }

    /// Stop searching or leave the partner without searching again.
    ///
    /// # Errors
    ///
    /// `IllegalTransition` once Ended.
    pub async fn end(&mut self) -> Result<(), SessionError> {
        let was_active = self.state != PeerState::Idle;
        self.advance(SessionInput::End)?;
        self.teardown().await;
        self.release_capture().await;

        if was_active {
            self.send(ClientMessage::Stop).await?;
        }
        Ok(())
    }

    /// Dispose of the session. Every later call fails.
    ///
    /// # Errors
    ///
    /// `IllegalTransition` if already Ended.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        self.advance(SessionInput::Close)?;
        self.teardown().await;
        self.release_capture().await;
        Ok(())
    }

    fn advance(&mut self, input: SessionInput) -> Result<(), SessionError> {
        let (next, effect) = transition(self.state, input)?;
        if next != self.state {
            debug!(
                target: "rv.session",
                from = %self.state,
                to = %next,
                input = input.as_str(),
                effect = ?effect,
                "Session transition"
            );
        }
        self.state = next;
        Ok(())
    }

    async fn on_match_found(
        &mut self,
        partner_id: ConnectionId,
        pairing_id: PairingId,
        initiator: bool,
    ) -> Result<(), SessionError> {
        self.advance(SessionInput::MatchFound)?;

        let Some(stream) = &self.stream else {
            return self.fail_negotiation(NegotiationError::CaptureNotReady).await;
        };
        let transport = match self.factory.create(stream).await {
            Ok(transport) => transport,
            Err(e) => return self.fail_negotiation(e).await,
        };

        info!(
            target: "rv.session",
            pairing_id = %pairing_id,
            partner_id = %partner_id,
            initiator,
            "Matched, negotiating"
        );

        let to = partner_id.as_str().to_string();
        self.link = Some(PeerLink {
            pairing_id,
            partner_id,
            transport,
            local_set: false,
            remote_set: false,
            candidates_exchanged: 0,
        });

        if !initiator {
            return Ok(());
        }

        match self.create_local_offer().await {
            Ok(offer) => {
                self.send(ClientMessage::Offer {
                    offer,
                    to,
                    room_id: None,
                })
                .await
            }
            Err(e) => self.fail_negotiation(e).await,
        }
    }

    async fn create_local_offer(&mut self) -> Result<SessionDescription, NegotiationError> {
        let link = self.link.as_mut().ok_or(NegotiationError::CaptureNotReady)?;
        let offer = link.transport.create_offer().await?;
        link.transport.set_local_description(offer.clone()).await?;
        link.local_set = true;
        Ok(offer)
    }

    async fn apply_remote_offer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.apply_remote_description(offer).await?;

        let link = self.link.as_mut().ok_or(NegotiationError::CaptureNotReady)?;
        let answer = link.transport.create_answer().await?;
        link.transport.set_local_description(answer.clone()).await?;
        link.local_set = true;
        Ok(answer)
    }

    async fn apply_remote_answer(&mut self, answer: SessionDescription) -> Result<(), NegotiationError> {
        self.apply_remote_description(answer).await
    }

    /// Set the remote description, then apply buffered candidates in
    /// receipt order.
    async fn apply_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let link = self.link.as_mut().ok_or(NegotiationError::CaptureNotReady)?;
        link.transport.set_remote_description(description).await?;
        link.remote_set = true;

        for candidate in self.candidates.flush(&link.pairing_id) {
            link.transport.add_ice_candidate(candidate).await?;
            link.candidates_exchanged += 1;
        }
        Ok(())
    }

    async fn apply_remote_candidate(&mut self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let link = self.link.as_mut().ok_or(NegotiationError::CaptureNotReady)?;
        if let Some(candidate) = self.candidates.add_candidate(&link.pairing_id, candidate) {
            link.transport.add_ice_candidate(candidate).await?;
            link.candidates_exchanged += 1;
        } else {
            debug!(
                target: "rv.session",
                pairing_id = %link.pairing_id,
                pending = self.candidates.pending(&link.pairing_id),
                "Buffered candidate until remote description is applied"
            );
        }
        Ok(())
    }

    fn check_negotiated(&mut self) -> Result<(), SessionError> {
        let negotiated = self.link.as_ref().is_some_and(PeerLink::is_negotiated);
        if self.state == PeerState::Negotiating && negotiated {
            self.advance(SessionInput::NegotiationComplete)?;
            info!(
                target: "rv.session",
                pairing_id = ?self.pairing_id().map(PairingId::as_str),
                "Peer session connected"
            );
            return Ok(());
        }
        self.advance(SessionInput::NegotiationProgress)
    }

    /// Force the session to Idle after a failed negotiation step.
    async fn fail_negotiation(&mut self, error: NegotiationError) -> Result<(), SessionError> {
        warn!(
            target: "rv.session",
            pairing_id = ?self.pairing_id().map(PairingId::as_str),
            error = %error,
            "Negotiation failed, returning to idle"
        );
        self.advance(SessionInput::NegotiationFailed)?;
        self.teardown().await;
        self.release_capture().await;
        self.send(ClientMessage::Stop).await?;
        Err(SessionError::Negotiation(error))
    }

    fn is_current(&self, from: &ConnectionId, pairing_id: &PairingId) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| &link.partner_id == from && &link.pairing_id == pairing_id)
    }

    fn discard(&self, kind: &'static str, from: &ConnectionId, pairing_id: &PairingId) {
        debug!(
            target: "rv.session",
            kind,
            from = %from,
            pairing_id = %pairing_id,
            "Discarding negotiation message for a stale pairing"
        );
    }

    async fn teardown(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.transport.close().await;
            let dropped = self.candidates.discard(&link.pairing_id);
            debug!(
                target: "rv.session",
                pairing_id = %link.pairing_id,
                dropped_candidates = dropped,
                "Transport closed"
            );
        }
    }

    async fn release_capture(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.capture.release(stream).await;
        }
    }

    async fn send(&self, message: ClientMessage) -> Result<(), SessionError> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::errors::CaptureError;
    use crate::session::transport::mock::{
        FailurePoint, MockMediaCapture, MockTransportFactory, TransportCall,
    };
    use common::signaling::SdpKind;
    use std::sync::Arc;

    type TestSession = PeerSession<Arc<MockMediaCapture>, MockTransportFactory>;

    fn session_with(
        capture: MockMediaCapture,
        factory: MockTransportFactory,
    ) -> (TestSession, Arc<MockMediaCapture>, mpsc::Receiver<ClientMessage>) {
        let capture = Arc::new(capture);
        let (tx, rx) = mpsc::channel(32);
        (PeerSession::new(Arc::clone(&capture), factory, tx), capture, rx)
    }

    fn match_found(initiator: bool) -> ServerEvent {
        ServerEvent::MatchFound {
            partner_id: ConnectionId::from("partner"),
            pairing_id: PairingId::from("p1"),
            initiator,
            common_interests: vec![],
        }
    }

    fn candidate_from_partner(candidate: &str) -> ServerEvent {
        ServerEvent::IceCandidate {
            candidate: IceCandidate::new(candidate),
            from: ConnectionId::from("partner"),
            pairing_id: PairingId::from("p1"),
        }
    }

    #[tokio::test]
    async fn test_start_acquires_capture_and_sends_waiting() {
        let (mut session, capture, mut rx) =
            session_with(MockMediaCapture::new(), MockTransportFactory::new());

        session.start(WaitingRequest::default()).await.unwrap();

        assert_eq!(session.state(), PeerState::Waiting);
        assert_eq!(capture.acquired(), 1);
        assert!(matches!(rx.recv().await.unwrap(), ClientMessage::Waiting(_)));
    }

    #[tokio::test]
    async fn test_capture_failure_stays_idle() {
        let (mut session, _capture, mut rx) = session_with(
            MockMediaCapture::failing(CaptureError::PermissionDenied),
            MockTransportFactory::new(),
        );

        let result = session.start(WaitingRequest::default()).await;

        assert!(matches!(
            result,
            Err(SessionError::Capture(CaptureError::PermissionDenied))
        ));
        assert_eq!(session.state(), PeerState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_initiator_sends_offer_on_match() {
        let factory = MockTransportFactory::new();
        let log = factory.log();
        let (mut session, _capture, mut rx) = session_with(MockMediaCapture::new(), factory);

        session.start(WaitingRequest::default()).await.unwrap();
        let _waiting = rx.recv().await.unwrap();
        session.handle_server_event(match_found(true)).await.unwrap();

        assert_eq!(session.state(), PeerState::Negotiating);
        match rx.recv().await.unwrap() {
            ClientMessage::Offer { to, offer, .. } => {
                assert_eq!(to, "partner");
                assert_eq!(offer.kind, SdpKind::Offer);
            }
            other => unreachable!("expected offer, got {other:?}"),
        }
        assert_eq!(
            log.calls().await,
            vec![TransportCall::CreateOffer, TransportCall::SetLocal(SdpKind::Offer)]
        );
    }

    #[tokio::test]
    async fn test_early_candidates_are_buffered_then_applied_in_order() {
        let factory = MockTransportFactory::new();
        let log = factory.log();
        let (mut session, _capture, mut rx) = session_with(MockMediaCapture::new(), factory);

        session.start(WaitingRequest::default()).await.unwrap();
        session.handle_server_event(match_found(false)).await.unwrap();

        session
            .handle_server_event(candidate_from_partner("c1"))
            .await
            .unwrap();
        session
            .handle_server_event(candidate_from_partner("c2"))
            .await
            .unwrap();
        assert!(log.applied_candidates().await.is_empty());
        assert_eq!(session.state(), PeerState::Negotiating);

        session
            .handle_server_event(ServerEvent::Offer {
                offer: SessionDescription::offer("v=0"),
                from: ConnectionId::from("partner"),
                pairing_id: PairingId::from("p1"),
            })
            .await
            .unwrap();

        assert_eq!(log.applied_candidates().await, vec!["c1", "c2"]);
        assert_eq!(session.state(), PeerState::Connected);

        let _waiting = rx.recv().await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            ClientMessage::Answer { .. }
        ));
    }

    #[tokio::test]
    async fn test_stale_pairing_messages_are_discarded() {
        let factory = MockTransportFactory::new();
        let log = factory.log();
        let (mut session, _capture, _rx) = session_with(MockMediaCapture::new(), factory);

        session.start(WaitingRequest::default()).await.unwrap();
        session.handle_server_event(match_found(false)).await.unwrap();

        session
            .handle_server_event(ServerEvent::Offer {
                offer: SessionDescription::offer("v=0"),
                from: ConnectionId::from("partner"),
                pairing_id: PairingId::from("old-pairing"),
            })
            .await
            .unwrap();
        session
            .handle_server_event(ServerEvent::IceCandidate {
                candidate: IceCandidate::new("c1"),
                from: ConnectionId::from("someone-else"),
                pairing_id: PairingId::from("p1"),
            })
            .await
            .unwrap();

        assert!(log.calls().await.is_empty());
        assert_eq!(session.state(), PeerState::Negotiating);
    }

    #[tokio::test]
    async fn test_candidate_for_skipped_pairing_is_discarded_while_waiting() {
        let factory = MockTransportFactory::new();
        let log = factory.log();
        let (mut session, _capture, mut rx) = session_with(MockMediaCapture::new(), factory);

        session.start(WaitingRequest::default()).await.unwrap();
        session.handle_server_event(match_found(false)).await.unwrap();
        session.skip().await.unwrap();
        assert_eq!(session.state(), PeerState::Waiting);
        let calls_after_skip = log.calls().await;

        // The former partner's candidate arrives late under the old pairing
        session
            .handle_server_event(candidate_from_partner("late"))
            .await
            .unwrap();

        assert_eq!(session.state(), PeerState::Waiting);
        assert!(session.pairing_id().is_none());
        assert!(log.applied_candidates().await.is_empty());
        assert_eq!(log.calls().await, calls_after_skip);

        assert!(matches!(rx.recv().await.unwrap(), ClientMessage::Waiting(_)));
        assert_eq!(rx.recv().await.unwrap(), ClientMessage::Skip);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejected_description_forces_idle() {
        let (mut session, capture, mut rx) = session_with(
            MockMediaCapture::new(),
            MockTransportFactory::failing_at(FailurePoint::RemoteDescription),
        );

        session.start(WaitingRequest::default()).await.unwrap();
        session.handle_server_event(match_found(false)).await.unwrap();
        let result = session
            .handle_server_event(ServerEvent::Offer {
                offer: SessionDescription::offer("v=0"),
                from: ConnectionId::from("partner"),
                pairing_id: PairingId::from("p1"),
            })
            .await;

        assert!(matches!(
            result,
            Err(SessionError::Negotiation(
                NegotiationError::DescriptionRejected(_)
            ))
        ));
        assert_eq!(session.state(), PeerState::Idle);
        assert!(session.pairing_id().is_none());
        assert_eq!(capture.outstanding(), 0);

        let _waiting = rx.recv().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ClientMessage::Stop);
    }

    #[tokio::test]
    async fn test_partner_left_requeues_with_last_request() {
        let factory = MockTransportFactory::new();
        let log = factory.log();
        let (mut session, capture, mut rx) = session_with(MockMediaCapture::new(), factory);

        let request = WaitingRequest {
            interests: vec!["music".to_string()],
            ..WaitingRequest::default()
        };
        session.start(request.clone()).await.unwrap();
        session.handle_server_event(match_found(false)).await.unwrap();
        session
            .handle_server_event(ServerEvent::PartnerLeft {
                pairing_id: PairingId::from("p1"),
            })
            .await
            .unwrap();

        assert_eq!(session.state(), PeerState::Waiting);
        assert_eq!(log.calls().await, vec![TransportCall::Close]);
        assert_eq!(capture.outstanding(), 1);

        let _first = rx.recv().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ClientMessage::Waiting(request));
    }

    #[tokio::test]
    async fn test_transport_failure_skips() {
        let (mut session, _capture, mut rx) =
            session_with(MockMediaCapture::new(), MockTransportFactory::new());

        session.start(WaitingRequest::default()).await.unwrap();
        session.handle_server_event(match_found(false)).await.unwrap();
        session
            .on_transport_state(TransportState::Failed)
            .await
            .unwrap();

        assert_eq!(session.state(), PeerState::Waiting);
        let _waiting = rx.recv().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ClientMessage::Skip);
    }

    #[tokio::test]
    async fn test_report_goes_idle_and_names_partner() {
        let (mut session, capture, mut rx) =
            session_with(MockMediaCapture::new(), MockTransportFactory::new());

        session.start(WaitingRequest::default()).await.unwrap();
        session.handle_server_event(match_found(true)).await.unwrap();
        session.report("spam").await.unwrap();

        assert_eq!(session.state(), PeerState::Idle);
        assert_eq!(capture.outstanding(), 0);

        let _waiting = rx.recv().await.unwrap();
        let _offer = rx.recv().await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            ClientMessage::Report {
                reported_user: ConnectionId::from("partner"),
                reason: "spam".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_closed_session_rejects_everything() {
        let (mut session, _capture, _rx) =
            session_with(MockMediaCapture::new(), MockTransportFactory::new());

        session.close().await.unwrap();

        assert_eq!(session.state(), PeerState::Ended);
        assert!(matches!(
            session.start(WaitingRequest::default()).await,
            Err(SessionError::IllegalTransition(_))
        ));
        assert!(matches!(
            session.handle_server_event(match_found(true)).await,
            Err(SessionError::IllegalTransition(_))
        ));
    }
}
