//! Metrics definitions for the Rendezvous service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rv_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by code:
//! - `kind`: offer, answer, ice-candidate, like, dislike
//! - `outcome`: delivered plus one value per drop reason
//! - `reason`: `max_age`, `idle`
//! - `operation`: one value per store method

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// Matching
// ============================================================================

/// Record a pairing formed by the coordinator.
///
/// Metric: `rv_matches_total`
pub fn record_match_formed() {
    counter!("rv_matches_total").increment(1);
}

/// Record how long the matched pool member waited before pairing.
///
/// Metric: `rv_match_wait_seconds`
pub fn record_match_wait(waited: Duration) {
    histogram!("rv_match_wait_seconds").record(waited.as_secs_f64());
}

/// Update the waiting pool size gauge.
///
/// Metric: `rv_waiting_pool_size`
#[allow(clippy::cast_precision_loss)]
pub fn set_waiting_pool_size(size: usize) {
    gauge!("rv_waiting_pool_size").set(size as f64);
}

/// Update the active pairings gauge.
///
/// Metric: `rv_active_pairings`
#[allow(clippy::cast_precision_loss)]
pub fn set_active_pairings(count: usize) {
    gauge!("rv_active_pairings").set(count as f64);
}

/// Record a pairing ended, by cause (skip, stop, report, disconnect).
///
/// Metric: `rv_pairings_ended_total`
pub fn record_pairing_ended(cause: &'static str) {
    counter!("rv_pairings_ended_total", "cause" => cause).increment(1);
}

/// Record a candidate evicted from the pool because it went offline.
///
/// Metric: `rv_pool_evictions_total`
pub fn record_pool_eviction() {
    counter!("rv_pool_evictions_total").increment(1);
}

// ============================================================================
// Relay
// ============================================================================

/// Record a relay attempt.
///
/// Metric: `rv_relay_messages_total`
/// Labels: `kind`, `outcome`
pub fn record_relay(kind: &'static str, outcome: &'static str) {
    counter!("rv_relay_messages_total", "kind" => kind, "outcome" => outcome).increment(1);
}

// ============================================================================
// Presence
// ============================================================================

/// Update the online connections gauge.
///
/// Metric: `rv_active_users`
#[allow(clippy::cast_precision_loss)]
pub fn set_active_users(count: usize) {
    gauge!("rv_active_users").set(count as f64);
}

// ============================================================================
// Rooms
// ============================================================================

/// Record a room creation.
///
/// Metric: `rv_rooms_created_total`
pub fn record_room_created() {
    counter!("rv_rooms_created_total").increment(1);
}

/// Record a join attempt by outcome (ok, `wrong_password`, `room_ended`).
///
/// Metric: `rv_room_joins_total`
pub fn record_room_join(outcome: &'static str) {
    counter!("rv_room_joins_total", "outcome" => outcome).increment(1);
}

/// Record a room ending, by reason (`max_age`, idle, host).
///
/// Metric: `rv_rooms_ended_total`
pub fn record_room_ended(reason: &'static str) {
    counter!("rv_rooms_ended_total", "reason" => reason).increment(1);
}

/// Record a store operation.
///
/// Metrics: `rv_store_operation_duration_seconds`, `rv_store_operations_total`
/// Labels: `operation`, `status`
pub fn record_store_operation(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!("rv_store_operation_duration_seconds",
        "operation" => operation,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("rv_store_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

// ============================================================================
// WebSocket
// ============================================================================

/// Update the open signaling connections gauge.
///
/// Metric: `rv_ws_connections`
pub fn ws_connection_opened() {
    gauge!("rv_ws_connections").increment(1.0);
}

/// Decrement the open signaling connections gauge.
pub fn ws_connection_closed() {
    gauge!("rv_ws_connections").decrement(1.0);
}

/// Record a rejected client frame.
///
/// Metric: `rv_rejected_frames_total`
pub fn record_rejected_frame() {
    counter!("rv_rejected_frames_total").increment(1);
}
