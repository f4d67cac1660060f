//! Rendezvous service error types.
//!
//! `RvError` maps to signaling `error` event codes for WebSocket clients and to
//! HTTP status codes for the room API. Messages returned to clients are
//! intentionally generic; the actual errors are logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::ProtocolError;
use serde::Serialize;
use thiserror::Error;

/// Rendezvous service error type.
///
/// Maps to signaling error codes:
/// - `Protocol`, `BadRequest`: `BAD_REQUEST` (1)
/// - `Forbidden`: `FORBIDDEN` (3)
/// - `RoomNotFound`, `ParticipantNotFound`: `NOT_FOUND` (4)
/// - `AlreadyWaiting`, `AlreadyPaired`, `NoSearchRequest`, `Conflict`: `CONFLICT` (5)
/// - `Store`, `Internal`: `INTERNAL_ERROR` (6)
#[derive(Debug, Error)]
pub enum RvError {
    /// Candidate is already in the waiting pool.
    #[error("Candidate is already waiting")]
    AlreadyWaiting,

    /// Candidate is in an active pairing.
    #[error("Candidate is already paired")]
    AlreadyPaired,

    /// Skip requested before any search request was made.
    #[error("No search request to resume")]
    NoSearchRequest,

    /// Room does not exist.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Caller has no participant row in the room.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// Caller is not allowed to perform the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Request was syntactically valid but rejected.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Request conflicts with current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Client frame could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Persistent store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Internal error (actor channel failure, blocking task failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Persistent store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A row had unexpected contents.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

/// Local media capture errors. Surfaced to the caller, never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// User denied access to camera or microphone.
    #[error("Media capture permission denied")]
    PermissionDenied,

    /// No capture device is available.
    #[error("Media capture device unavailable: {0}")]
    Unavailable(String),
}

/// Negotiation errors. Force the session back to Idle with a notice.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    /// Local capture was not ready when a transport was needed.
    #[error("Local media is not ready")]
    CaptureNotReady,

    /// The transport rejected a session description.
    #[error("Session description rejected: {0}")]
    DescriptionRejected(String),

    /// The transport rejected a connectivity candidate.
    #[error("ICE candidate rejected: {0}")]
    CandidateRejected(String),

    /// The transport failed to create a description or could not be built.
    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Errors surfaced by a peer session driver.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// The session was forced back to Idle.
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    IllegalTransition(#[from] crate::session::machine::IllegalTransition),

    #[error("Signaling channel closed")]
    ChannelClosed,
}

impl RvError {
    /// Returns the signaling error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            RvError::Protocol(_) | RvError::BadRequest(_) => 1, // BAD_REQUEST
            RvError::Forbidden(_) => 3,                         // FORBIDDEN
            RvError::RoomNotFound(_) | RvError::ParticipantNotFound(_) => 4, // NOT_FOUND
            RvError::AlreadyWaiting
            | RvError::AlreadyPaired
            | RvError::NoSearchRequest
            | RvError::Conflict(_) => 5, // CONFLICT
            RvError::Store(_) | RvError::Internal(_) => 6, // INTERNAL_ERROR
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RvError::AlreadyWaiting => "Already searching for a partner".to_string(),
            RvError::AlreadyPaired => "Already connected to a partner".to_string(),
            RvError::NoSearchRequest => "No search to resume".to_string(),
            RvError::RoomNotFound(_) => "Room not found".to_string(),
            RvError::ParticipantNotFound(_) => "Not a participant of this room".to_string(),
            RvError::Protocol(_) => "Malformed message".to_string(),
            RvError::Forbidden(msg) | RvError::BadRequest(msg) | RvError::Conflict(msg) => {
                msg.clone()
            }
            RvError::Store(_) | RvError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            RvError::Protocol(_) | RvError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RvError::Forbidden(_) => StatusCode::FORBIDDEN,
            RvError::RoomNotFound(_) | RvError::ParticipantNotFound(_) => StatusCode::NOT_FOUND,
            RvError::AlreadyWaiting
            | RvError::AlreadyPaired
            | RvError::NoSearchRequest
            | RvError::Conflict(_) => StatusCode::CONFLICT,
            RvError::Store(_) | RvError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code_name(&self) -> &'static str {
        match self {
            RvError::Protocol(_) | RvError::BadRequest(_) => "BAD_REQUEST",
            RvError::Forbidden(_) => "FORBIDDEN",
            RvError::RoomNotFound(_) | RvError::ParticipantNotFound(_) => "NOT_FOUND",
            RvError::AlreadyWaiting
            | RvError::AlreadyPaired
            | RvError::NoSearchRequest
            | RvError::Conflict(_) => "CONFLICT",
            RvError::Store(_) => "STORE_ERROR",
            RvError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RvError {
    fn into_response(self) -> Response {
        match &self {
            RvError::Store(err) => {
                tracing::error!(target: "rv.store", error = %err, "Store operation failed");
            }
            RvError::Internal(err) => {
                tracing::error!(target: "rv.internal", error = %err, "Internal error");
            }
            _ => {}
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code_name(),
                message: self.client_message(),
            },
        };

        (self.status_code(), Json(body)).into_response()
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}
