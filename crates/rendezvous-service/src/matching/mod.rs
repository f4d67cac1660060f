//! Random 1:1 matching.
//!
//! - [`candidate`] - waiting candidates, compatibility and the FIFO pool
//! - [`pairing`] - active pairings
//! - [`coordinator`] - the actor that owns both and serializes every mutation

pub mod candidate;
pub mod coordinator;
pub mod messages;
pub mod pairing;

pub use candidate::{is_compatible, Candidate, WaitingPool};
pub use coordinator::{MatchingCoordinator, MatchingCoordinatorHandle};
pub use messages::{CoordinatorStatus, EnqueueOutcome, Rating, RatingTally};
pub use pairing::{Pairing, PairingTable};
