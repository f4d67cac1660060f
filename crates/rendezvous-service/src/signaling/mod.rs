//! Signaling plumbing shared by the 1:1 and room paths.
//!
//! - [`relay`] - per-connection outboxes with at-most-once delivery
//! - [`candidate_buffer`] - ordered buffering of early ICE candidates

pub mod candidate_buffer;
pub mod relay;

pub use candidate_buffer::IceCandidateBuffer;
pub use relay::{DropReason, RelayOutcome, SignalingRelay};
