//! Integration tests for stranger matching over the signaling protocol.
//!
//! Clients are driven through the real frame dispatcher; only the socket is
//! simulated.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::signaling::{ClientMessage, ServerEvent};
use common::types::{ConnectionId, PairingId};
use rendezvous_service::handlers::dispatch_frame;
use rendezvous_test_utils::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Pull a `match-found` event apart.
fn match_found(event: ServerEvent) -> (ConnectionId, PairingId, bool, Vec<String>) {
    match event {
        ServerEvent::MatchFound {
            partner_id,
            pairing_id,
            initiator,
            common_interests,
        } => Some((partner_id, pairing_id, initiator, common_interests)),
        _ => None,
    }
    .expect("expected match-found")
}

#[tokio::test]
async fn test_two_waiting_clients_are_paired() {
    let service = TestService::spawn();
    let mut alice = service.connect(None).await;
    let mut bob = service.connect(None).await;

    alice
        .send(&waiting_frame(
            WaitingRequestBuilder::new()
                .interests(&["Chess", "music"])
                .build(),
        ))
        .await;
    alice.assert_no_event().await;

    bob.send(&waiting_frame(
        WaitingRequestBuilder::new()
            .interests(&["chess", "hiking"])
            .build(),
    ))
    .await;

    let (a_partner, a_pairing, a_initiator, a_common) = match_found(alice.next_event().await);
    let (b_partner, b_pairing, b_initiator, b_common) = match_found(bob.next_event().await);

    assert_eq!(&a_partner, bob.id());
    assert_eq!(&b_partner, alice.id());
    assert_eq!(a_pairing, b_pairing);
    assert_ne!(a_initiator, b_initiator, "exactly one side initiates");
    assert_eq!(a_initiator, alice.id() < bob.id());
    assert_eq!(a_common, vec!["chess".to_string()]);
    assert_eq!(b_common, a_common);

    let status = service.state().coordinator.status().await.unwrap();
    assert_eq!(status.waiting, 0);
    assert_eq!(status.active_pairings, 1);
}

#[tokio::test]
async fn test_filters_keep_incompatible_clients_apart() {
    let service = TestService::spawn();
    let mut alice = service.connect(None).await;
    let mut bob = service.connect(None).await;
    let mut carol = service.connect(None).await;

    alice
        .send(&waiting_frame(
            WaitingRequestBuilder::new()
                .profile("female", "DE")
                .wants_country(&["fr"])
                .build(),
        ))
        .await;
    bob.send(&waiting_frame(
        WaitingRequestBuilder::new().profile("male", "US").build(),
    ))
    .await;
    alice.assert_no_event().await;
    bob.assert_no_event().await;

    carol
        .send(&waiting_frame(
            WaitingRequestBuilder::new().profile("female", "FR").build(),
        ))
        .await;

    // Alice has waited longest and accepts carol
    let (partner, _, _, _) = match_found(carol.next_event().await);
    assert_eq!(&partner, alice.id());
    match_found(alice.next_event().await);
    bob.assert_no_event().await;
}

#[tokio::test]
async fn test_same_device_is_never_paired() {
    let service = TestService::spawn();
    let mut first = service.connect(None).await;
    let mut second = service.connect(None).await;

    first
        .send(&waiting_frame(WaitingRequestBuilder::new().device("phone-1").build()))
        .await;
    second
        .send(&waiting_frame(WaitingRequestBuilder::new().device("phone-1").build()))
        .await;

    first.assert_no_event().await;
    second.assert_no_event().await;
    assert_eq!(service.state().coordinator.status().await.unwrap().waiting, 2);
}

#[tokio::test]
async fn test_duplicate_waiting_is_rejected_with_error_event() {
    let service = TestService::spawn();
    let mut alice = service.connect(None).await;

    let request = waiting_frame(WaitingRequestBuilder::new().build());
    alice.send(&request).await;
    alice.send(&request).await;

    match alice.next_event().await {
        ServerEvent::Error { code, .. } => assert_eq!(code, 5),
        other => unreachable!("expected error event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_frame_yields_error_and_connection_survives() {
    let service = TestService::spawn();
    let mut alice = service.connect(None).await;
    let mut bob = service.connect(None).await;

    alice.send("{not json").await;
    match alice.next_event().await {
        ServerEvent::Error { code, message } => {
            assert_eq!(code, 1);
            assert_eq!(message, "Malformed message");
        }
        other => unreachable!("expected error event, got {other:?}"),
    }

    alice.send(r#"{"type":"teleport"}"#).await;
    assert!(matches!(
        alice.next_event().await,
        ServerEvent::Error { code: 1, .. }
    ));

    // Still usable afterwards
    alice
        .send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    bob.send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    match_found(alice.next_event().await);
}

#[tokio::test]
async fn test_negotiation_is_relayed_only_between_partners() {
    let service = TestService::spawn();
    let mut alice = service.connect(None).await;
    let mut bob = service.connect(None).await;
    let mut mallory = service.connect(None).await;

    alice
        .send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    bob.send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    let (_, pairing_id, _, _) = match_found(alice.next_event().await);
    match_found(bob.next_event().await);

    alice.send(&offer_frame(bob.id(), "v=0 alice")).await;
    match bob.next_event().await {
        ServerEvent::Offer {
            offer,
            from,
            pairing_id: relayed_pairing,
        } => {
            assert_eq!(offer.sdp, "v=0 alice");
            assert_eq!(&from, alice.id());
            assert_eq!(relayed_pairing, pairing_id);
        }
        other => unreachable!("expected offer, got {other:?}"),
    }

    // A stranger cannot inject into the pairing
    mallory.send(&ice_frame(bob.id(), "candidate:evil")).await;
    bob.assert_no_event().await;
    mallory.assert_no_event().await;

    bob.send(&answer_frame(alice.id(), "v=0 bob")).await;
    assert!(matches!(
        alice.next_event().await,
        ServerEvent::Answer { .. }
    ));

    bob.send(&ice_frame(alice.id(), "candidate:1")).await;
    match alice.next_event().await {
        ServerEvent::IceCandidate { candidate, from, .. } => {
            assert_eq!(candidate.candidate, "candidate:1");
            assert_eq!(&from, bob.id());
        }
        other => unreachable!("expected ice-candidate, got {other:?}"),
    }
}

#[tokio::test]
async fn test_skip_notifies_partner_and_requeues_skipper() {
    let service = TestService::spawn();
    let mut alice = service.connect(None).await;
    let mut bob = service.connect(None).await;
    let mut carol = service.connect(None).await;

    alice
        .send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    bob.send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    let (_, first_pairing, _, _) = match_found(alice.next_event().await);
    match_found(bob.next_event().await);

    alice.send_message(&ClientMessage::Skip).await;

    match bob.next_event().await {
        ServerEvent::PartnerLeft { pairing_id } => assert_eq!(pairing_id, first_pairing),
        other => unreachable!("expected partner-left, got {other:?}"),
    }

    // Alice is waiting again with her last request and meets carol
    carol
        .send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    let (partner, second_pairing, _, _) = match_found(carol.next_event().await);
    assert_eq!(&partner, alice.id());
    let (partner, _, _, _) = match_found(alice.next_event().await);
    assert_eq!(&partner, carol.id());
    assert_ne!(second_pairing, first_pairing);
}

#[tokio::test]
async fn test_skip_without_search_is_an_error() {
    let service = TestService::spawn();
    let mut alice = service.connect(None).await;

    alice.send_message(&ClientMessage::Skip).await;
    assert!(matches!(
        alice.next_event().await,
        ServerEvent::Error { code: 5, .. }
    ));
}

#[tokio::test]
async fn test_stop_and_leave_waiting() {
    let service = TestService::spawn();
    let mut alice = service.connect(None).await;
    let mut bob = service.connect(None).await;

    alice
        .send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    alice.send_message(&ClientMessage::LeaveWaiting).await;
    // Idempotent
    alice.send_message(&ClientMessage::LeaveWaiting).await;
    alice.assert_no_event().await;
    assert_eq!(service.state().coordinator.status().await.unwrap().waiting, 0);

    alice
        .send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    bob.send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    match_found(alice.next_event().await);
    match_found(bob.next_event().await);

    bob.send_message(&ClientMessage::Stop).await;
    assert!(matches!(
        alice.next_event().await,
        ServerEvent::PartnerLeft { .. }
    ));

    // Stop clears the remembered request
    bob.send_message(&ClientMessage::Skip).await;
    assert!(matches!(
        bob.next_event().await,
        ServerEvent::Error { code: 5, .. }
    ));
}

#[tokio::test]
async fn test_ratings_reach_only_the_current_partner() {
    let service = TestService::spawn();
    let mut alice = service.connect(None).await;
    let mut bob = service.connect(None).await;
    let mut carol = service.connect(None).await;

    alice
        .send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    bob.send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    match_found(alice.next_event().await);
    match_found(bob.next_event().await);

    alice
        .send_message(&ClientMessage::Like {
            user_id: bob.id().clone(),
        })
        .await;
    alice
        .send_message(&ClientMessage::Dislike {
            user_id: bob.id().clone(),
        })
        .await;

    assert_eq!(
        bob.next_event().await,
        ServerEvent::UserStats {
            likes: 1,
            dislikes: 0
        }
    );
    assert_eq!(
        bob.next_event().await,
        ServerEvent::UserStats {
            likes: 1,
            dislikes: 1
        }
    );

    carol
        .send_message(&ClientMessage::Like {
            user_id: bob.id().clone(),
        })
        .await;
    bob.assert_no_event().await;
    alice.assert_no_event().await;
}

#[tokio::test]
async fn test_report_ends_pairing_and_reaches_moderation() {
    let service = TestService::spawn();
    let mut alice = service.connect(Some("acct-alice")).await;
    let mut bob = service.connect(Some("acct-bob")).await;

    alice
        .send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    bob.send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    let (_, pairing_id, _, _) = match_found(alice.next_event().await);
    match_found(bob.next_event().await);

    alice
        .send_message(&ClientMessage::Report {
            reported_user: bob.id().clone(),
            reason: "spam".to_string(),
        })
        .await;

    assert!(matches!(
        bob.next_event().await,
        ServerEvent::PartnerLeft { .. }
    ));

    let reports = service.moderation().wait_for(1).await;
    let report = reports.first().unwrap();
    assert_eq!(&report.reporter, alice.id());
    assert_eq!(&report.reported, bob.id());
    assert_eq!(report.reporter_account.as_ref(), alice.account());
    assert_eq!(report.reported_account.as_ref(), bob.account());
    assert_eq!(report.pairing_id.as_ref(), Some(&pairing_id));
    assert_eq!(report.reason, "spam");

    // The reporter is not re-queued
    assert_eq!(service.state().coordinator.status().await.unwrap().waiting, 0);
}

#[tokio::test]
async fn test_disconnect_notifies_partner_and_frees_pool() {
    let service = TestService::spawn();
    let alice = service.connect(None).await;
    let mut bob = service.connect(None).await;
    let carol = service.connect(None).await;

    alice
        .send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    bob.send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    match_found(bob.next_event().await);

    alice.disconnect().await;
    assert!(matches!(
        bob.next_event().await,
        ServerEvent::PartnerLeft { .. }
    ));

    carol
        .send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    carol.disconnect().await;

    let status = service.state().coordinator.status().await.unwrap();
    assert_eq!(status.waiting, 0);
    assert_eq!(status.active_pairings, 0);
}

#[tokio::test]
async fn test_candidate_gone_offline_is_skipped() {
    let service = TestService::spawn();
    let ghost = service.connect(None).await;
    let mut alice = service.connect(None).await;
    let mut bob = service.connect(None).await;

    ghost
        .send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    // Presence drops without the coordinator hearing about it
    service.state().presence.unregister(ghost.id()).await;

    alice
        .send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    alice.assert_no_event().await;

    bob.send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    let (partner, _, _, _) = match_found(bob.next_event().await);
    assert_eq!(&partner, alice.id());
    assert!(alice
        .try_next_event(Duration::from_secs(1))
        .await
        .is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_waiting_clients_are_each_matched_once() {
    const CLIENTS: usize = 40;

    let service = TestService::spawn();
    let mut clients = Vec::with_capacity(CLIENTS);
    for _ in 0..CLIENTS {
        clients.push(service.connect(None).await);
    }

    let frame = waiting_frame(WaitingRequestBuilder::new().build());
    let mut sends = Vec::with_capacity(CLIENTS);
    for client in &clients {
        let state = Arc::clone(service.state());
        let connection_id = client.id().clone();
        let frame = frame.clone();
        sends.push(tokio::spawn(async move {
            dispatch_frame(&state, &connection_id, None, &frame).await;
        }));
    }
    for send in sends {
        send.await.unwrap();
    }

    let mut partners: HashMap<ConnectionId, (ConnectionId, PairingId)> = HashMap::new();
    for client in &mut clients {
        let (partner, pairing_id, _, _) = match_found(client.next_event().await);
        assert_ne!(&partner, client.id());
        partners.insert(client.id().clone(), (partner, pairing_id));
    }
    for client in &mut clients {
        client.assert_no_event().await;
    }

    for (member, (partner, pairing_id)) in &partners {
        let (back, back_pairing) = partners.get(partner).unwrap();
        assert_eq!(back, member, "partners must be mutual");
        assert_eq!(back_pairing, pairing_id);
    }
    let pairings: HashSet<&PairingId> = partners.values().map(|(_, id)| id).collect();
    assert_eq!(pairings.len(), CLIENTS / 2);

    let status = service.state().coordinator.status().await.unwrap();
    assert_eq!(status.waiting, 0);
    assert_eq!(status.active_pairings, CLIENTS / 2);
}

#[tokio::test]
async fn test_candidate_from_former_partner_is_dropped_after_skip() {
    let service = TestService::spawn();
    let mut alice = service.connect(None).await;
    let mut bob = service.connect(None).await;

    alice
        .send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    bob.send(&waiting_frame(WaitingRequestBuilder::new().build()))
        .await;
    let (_, pairing_id, _, _) = match_found(alice.next_event().await);
    match_found(bob.next_event().await);

    alice.send_message(&ClientMessage::Skip).await;
    assert_eq!(
        bob.next_event().await,
        ServerEvent::PartnerLeft { pairing_id }
    );

    // Bob has not caught up yet and still trickles a candidate to alice
    bob.send(&ice_frame(alice.id(), "candidate:late")).await;

    alice.assert_no_event().await;
    bob.assert_no_event().await;

    let status = service.state().coordinator.status().await.unwrap();
    assert_eq!(status.waiting, 1);
    assert_eq!(status.active_pairings, 0);
}
