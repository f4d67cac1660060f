//! Peer session state machine.
//!
//! - [`machine`] - the pure `(state, input) -> (state, effect)` table
//! - [`transport`] - capture and transport traits, plus mocks
//! - [`peer`] - the driver that applies effects against those traits

pub mod machine;
pub mod peer;
pub mod transport;

pub use machine::{transition, Effect, IllegalTransition, PeerState, SessionInput};
pub use peer::PeerSession;
pub use transport::{LocalStream, MediaCapture, MediaTransport, TransportFactory, TransportState};
