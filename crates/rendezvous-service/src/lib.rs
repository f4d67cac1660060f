//! Rendezvous Service Library
//!
//! Core of the Rendezvous service:
//!
//! - Stranger matchmaking: a single coordinator actor owns the waiting pool
//!   and the active pairings, so every match decision is serialized
//! - Signaling relay: offers, answers and ICE candidates are forwarded only
//!   between the two sides of a pairing or two members of an open room
//! - Room lifecycle: persistent multi-participant rooms with host actions,
//!   password-protected joins and expiration
//! - Peer session state machine: the client-side driver of one 1:1 call
//!
//! # Architecture
//!
//! ```text
//! /ws socket ──> dispatch_frame ──> MatchingCoordinator (actor)
//!                     │                    │
//!                     └──> RoomManager     ├──> SignalingRelay (outboxes)
//!                              │           └──> PresenceTracker
//!                              └──> RoomStore (memory | PostgreSQL)
//! ```
//!
//! # Modules
//!
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with signaling and HTTP error codes
//! - [`handlers`] - HTTP and WebSocket handlers
//! - [`matching`] - Waiting pool, pairings and the coordinator actor
//! - [`moderation`] - Report sink
//! - [`observability`] - Health probes and Prometheus metrics
//! - [`presence`] - Online connections per account
//! - [`rooms`] - Room lifecycle, expiration and persistence
//! - [`routes`] - Router construction and shared state
//! - [`session`] - Client-side peer session state machine
//! - [`signaling`] - Outbox relay and ICE candidate buffering

pub mod config;
pub mod errors;
pub mod handlers;
pub mod matching;
pub mod moderation;
pub mod observability;
pub mod presence;
pub mod rooms;
pub mod routes;
pub mod session;
pub mod signaling;
