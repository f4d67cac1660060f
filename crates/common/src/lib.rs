//! Common utilities and types shared across Rendezvous components.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for strongly-typed identifiers
pub mod types;

/// Module for the signaling wire protocol
pub mod signaling;
