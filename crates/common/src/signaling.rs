//! Signaling wire protocol.
//!
//! Frames are JSON objects tagged by a `type` field. The protocol is
//! transport-agnostic: the service speaks it over WebSocket text frames, and
//! tests drive it over in-process channels.
//!
//! Relayed negotiation payloads (`offer`, `answer`, `ice-candidate`) are
//! forwarded verbatim. The `from` field on the receiving side is always
//! injected by the relay; clients never supply it.

use crate::error::{ProtocolError, Result};
use crate::types::{AccountId, ConnectionId, PairingId, RoomId};
use serde::{Deserialize, Serialize};

/// Maximum accepted length of a report reason.
pub const MAX_REPORT_REASON_LEN: usize = 500;

/// Maximum number of interest tags accepted in one `waiting` request.
pub const MAX_INTERESTS: usize = 32;

/// Attribute filters a candidate applies to potential partners.
///
/// An empty list places no constraint on that attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFilters {
    #[serde(default)]
    pub gender: Vec<String>,
    #[serde(default)]
    pub countries: Vec<String>,
}

/// Public profile snippet shown to a partner and checked against filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Payload of a `waiting` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingRequest {
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub filters: MatchFilters,
    #[serde(default)]
    pub user_profile: UserProfile,
}

/// Session description type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session description exchanged during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Connectivity candidate proposed by one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    #[must_use]
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

/// Negotiation message kinds carried by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayKind {
    Offer,
    Answer,
    IceCandidate,
}

impl RelayKind {
    /// Label used for metrics and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RelayKind::Offer => "offer",
            RelayKind::Answer => "answer",
            RelayKind::IceCandidate => "ice-candidate",
        }
    }
}

/// Negotiation payload routed by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
}

impl RelayPayload {
    #[must_use]
    pub fn kind(&self) -> RelayKind {
        match self {
            RelayPayload::Offer(_) => RelayKind::Offer,
            RelayPayload::Answer(_) => RelayKind::Answer,
            RelayPayload::IceCandidate(_) => RelayKind::IceCandidate,
        }
    }

    /// Build the event delivered to the destination.
    #[must_use]
    pub fn into_event(self, from: ConnectionId, pairing_id: PairingId) -> ServerEvent {
        match self {
            RelayPayload::Offer(offer) => ServerEvent::Offer {
                offer,
                from,
                pairing_id,
            },
            RelayPayload::Answer(answer) => ServerEvent::Answer {
                answer,
                from,
                pairing_id,
            },
            RelayPayload::IceCandidate(candidate) => ServerEvent::IceCandidate {
                candidate,
                from,
                pairing_id,
            },
        }
    }
}

/// Where a negotiation frame should be routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayTarget {
    /// The sender's current 1:1 partner.
    Partner(ConnectionId),
    /// Another member of a room the sender belongs to.
    RoomMember {
        room_id: RoomId,
        account_id: AccountId,
    },
}

/// A decoded negotiation frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub payload: RelayPayload,
    pub target: RelayTarget,
}

/// Frames sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "waiting")]
    Waiting(WaitingRequest),

    #[serde(rename = "leave-waiting")]
    LeaveWaiting,

    /// When `room_id` is set, `to` names a room member account rather than
    /// a connection.
    #[serde(rename = "offer", rename_all = "camelCase")]
    Offer {
        offer: SessionDescription,
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },

    #[serde(rename = "answer", rename_all = "camelCase")]
    Answer {
        answer: SessionDescription,
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },

    #[serde(rename = "ice-candidate", rename_all = "camelCase")]
    IceCandidate {
        candidate: IceCandidate,
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },

    #[serde(rename = "skip")]
    Skip,

    #[serde(rename = "stop")]
    Stop,

    #[serde(rename = "like", rename_all = "camelCase")]
    Like { user_id: ConnectionId },

    #[serde(rename = "dislike", rename_all = "camelCase")]
    Dislike { user_id: ConnectionId },

    #[serde(rename = "report", rename_all = "camelCase")]
    Report {
        reported_user: ConnectionId,
        #[serde(default)]
        reason: String,
    },
}

impl ClientMessage {
    /// Decode and validate a client frame.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Malformed` for invalid JSON or unknown types,
    /// and `ProtocolError::InvalidField` for out-of-bounds fields.
    pub fn decode(frame: &str) -> Result<Self> {
        let message: ClientMessage = serde_json::from_str(frame)?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<()> {
        match self {
            ClientMessage::Waiting(request) if request.interests.len() > MAX_INTERESTS => {
                Err(ProtocolError::InvalidField {
                    field: "interests",
                    reason: format!("at most {MAX_INTERESTS} interests allowed"),
                })
            }
            ClientMessage::Offer { to, .. }
            | ClientMessage::Answer { to, .. }
            | ClientMessage::IceCandidate { to, .. }
                if to.is_empty() =>
            {
                Err(ProtocolError::InvalidField {
                    field: "to",
                    reason: "destination must not be empty".to_string(),
                })
            }
            ClientMessage::Report { reason, .. } if reason.len() > MAX_REPORT_REASON_LEN => {
                Err(ProtocolError::InvalidField {
                    field: "reason",
                    reason: format!("at most {MAX_REPORT_REASON_LEN} bytes allowed"),
                })
            }
            _ => Ok(()),
        }
    }

    /// Split a negotiation frame into its payload and routing target.
    #[must_use]
    pub fn into_relay(self) -> Option<RelayRequest> {
        let (payload, to, room_id) = match self {
            ClientMessage::Offer { offer, to, room_id } => {
                (RelayPayload::Offer(offer), to, room_id)
            }
            ClientMessage::Answer {
                answer,
                to,
                room_id,
            } => (RelayPayload::Answer(answer), to, room_id),
            ClientMessage::IceCandidate {
                candidate,
                to,
                room_id,
            } => (RelayPayload::IceCandidate(candidate), to, room_id),
            _ => return None,
        };

        let target = match room_id {
            Some(room_id) => RelayTarget::RoomMember {
                room_id,
                account_id: AccountId::from(to),
            },
            None => RelayTarget::Partner(ConnectionId::from(to)),
        };

        Some(RelayRequest { payload, target })
    }
}

/// Frames sent by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "match-found", rename_all = "camelCase")]
    MatchFound {
        partner_id: ConnectionId,
        pairing_id: PairingId,
        initiator: bool,
        #[serde(default)]
        common_interests: Vec<String>,
    },

    #[serde(rename = "offer", rename_all = "camelCase")]
    Offer {
        offer: SessionDescription,
        from: ConnectionId,
        pairing_id: PairingId,
    },

    #[serde(rename = "answer", rename_all = "camelCase")]
    Answer {
        answer: SessionDescription,
        from: ConnectionId,
        pairing_id: PairingId,
    },

    #[serde(rename = "ice-candidate", rename_all = "camelCase")]
    IceCandidate {
        candidate: IceCandidate,
        from: ConnectionId,
        pairing_id: PairingId,
    },

    #[serde(rename = "partner-left", rename_all = "camelCase")]
    PartnerLeft { pairing_id: PairingId },

    #[serde(rename = "userStats")]
    UserStats { likes: u64, dislikes: u64 },

    #[serde(rename = "activeUsers")]
    ActiveUsers { count: usize },

    #[serde(rename = "error")]
    Error { code: i32, message: String },

    #[serde(rename = "room-kicked", rename_all = "camelCase")]
    RoomKicked { room_id: RoomId },

    #[serde(rename = "room-muted", rename_all = "camelCase")]
    RoomMuted { room_id: RoomId },

    #[serde(rename = "room-ended", rename_all = "camelCase")]
    RoomEnded { room_id: RoomId },
}

impl ServerEvent {
    /// Encode the event as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Encoding` if serialization fails.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encoding(e.to_string()))
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            ServerEvent::MatchFound { .. } => "match-found",
            ServerEvent::Offer { .. } => "offer",
            ServerEvent::Answer { .. } => "answer",
            ServerEvent::IceCandidate { .. } => "ice-candidate",
            ServerEvent::PartnerLeft { .. } => "partner-left",
            ServerEvent::UserStats { .. } => "userStats",
            ServerEvent::ActiveUsers { .. } => "activeUsers",
            ServerEvent::Error { .. } => "error",
            ServerEvent::RoomKicked { .. } => "room-kicked",
            ServerEvent::RoomMuted { .. } => "room-muted",
            ServerEvent::RoomEnded { .. } => "room-ended",
        }
    }
}
