//! Explicit transition table for a peer session.
//!
//! `transition` is pure: it maps `(state, input)` to the next state and the
//! side effect the driver must perform. Any pair not listed is an
//! `IllegalTransition` rather than a silent no-op.

use std::fmt;
use thiserror::Error;

/// Lifecycle state of one client's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// No pairing, no capture.
    Idle,
    /// Capture acquired, enqueued.
    Waiting,
    /// Matched; exchanging descriptions and candidates.
    Negotiating,
    /// Negotiation complete and the transport reports success.
    Connected,
    /// Terminal.
    Ended,
}

impl PeerState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PeerState::Idle => "idle",
            PeerState::Waiting => "waiting",
            PeerState::Negotiating => "negotiating",
            PeerState::Connected => "connected",
            PeerState::Ended => "ended",
        }
    }

    /// Whether a peer transport may exist in this state.
    #[must_use]
    pub const fn has_transport(&self) -> bool {
        matches!(self, PeerState::Negotiating | PeerState::Connected)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionInput {
    Start,
    MatchFound,
    /// A description or candidate was exchanged without completing negotiation.
    NegotiationProgress,
    NegotiationComplete,
    Skip,
    PartnerLeft,
    TransportLost,
    Report,
    End,
    NegotiationFailed,
    Close,
}

impl SessionInput {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionInput::Start => "start",
            SessionInput::MatchFound => "match_found",
            SessionInput::NegotiationProgress => "negotiation_progress",
            SessionInput::NegotiationComplete => "negotiation_complete",
            SessionInput::Skip => "skip",
            SessionInput::PartnerLeft => "partner_left",
            SessionInput::TransportLost => "transport_lost",
            SessionInput::Report => "report",
            SessionInput::End => "end",
            SessionInput::NegotiationFailed => "negotiation_failed",
            SessionInput::Close => "close",
        }
    }
}

/// Work the driver performs after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Acquire capture and send the search request.
    Enqueue,
    /// Build a transport for the new pairing.
    BeginNegotiation,
    /// Close the transport and release capture.
    Teardown,
    /// Close the transport and search again.
    TeardownAndRequeue,
    /// Close the transport and file a report.
    TeardownAndReport,
    /// Release everything; the session is finished.
    Dispose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal transition: {input:?} in state {state}")]
pub struct IllegalTransition {
    pub state: PeerState,
    pub input: SessionInput,
}

/// Compute the next state and effect for `input` in `state`.
///
/// # Errors
///
/// Returns `IllegalTransition` for any pair not in the table. The state is
/// left unchanged by the caller in that case.
pub fn transition(
    state: PeerState,
    input: SessionInput,
) -> Result<(PeerState, Effect), IllegalTransition> {
    use PeerState::{Connected, Ended, Idle, Negotiating, Waiting};
    use SessionInput as In;

    let next = match (state, input) {
        (Idle, In::Start) => (Waiting, Effect::Enqueue),
        (Waiting, In::MatchFound) => (Negotiating, Effect::BeginNegotiation),
        (Negotiating | Connected, In::NegotiationProgress) => (state, Effect::None),
        (Negotiating, In::NegotiationComplete) => (Connected, Effect::None),
        (Waiting | Negotiating | Connected, In::Skip)
        | (Negotiating | Connected, In::PartnerLeft | In::TransportLost) => {
            (Waiting, Effect::TeardownAndRequeue)
        }
        (Negotiating | Connected, In::Report) => (Idle, Effect::TeardownAndReport),
        (Negotiating | Connected, In::NegotiationFailed | In::End) | (Waiting, In::End) => {
            (Idle, Effect::Teardown)
        }
        (Idle, In::End) => (Idle, Effect::None),
        (Idle | Waiting | Negotiating | Connected, In::Close) => (Ended, Effect::Dispose),
        _ => return Err(IllegalTransition { state, input }),
    };

    Ok(next)
}
