//! Room lifecycle handlers.
//!
//! - `POST /api/v1/rooms` - create a room (caller becomes host)
//! - `GET /api/v1/rooms/{room_id}` - room snapshot
//! - `POST /api/v1/rooms/{room_id}/join` - join, optionally with a password
//! - `POST /api/v1/rooms/{room_id}/leave` | `busy` | `activity`
//! - `POST /api/v1/rooms/{room_id}/invite` | `kick` | `mute` | `end` - host only
//!
//! The caller is named by the `x-user-id` header. Bodies are parsed by hand
//! so malformed JSON yields 400 rather than Axum's 422.

use crate::errors::RvError;
use crate::rooms::{HostActionOutcome, JoinOutcome, Room, RoomSnapshot};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    Json,
};
use common::types::{AccountId, GroupId, RoomId};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Header carrying the caller's account id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Account id of the caller, taken from [`USER_ID_HEADER`].
#[derive(Debug, Clone)]
pub struct CallerId(pub AccountId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = RvError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| RvError::Forbidden("Caller identity required".to_string()))?
            .to_str()
            .map_err(|_| RvError::BadRequest("Invalid caller identity".to_string()))?
            .trim();

        if value.is_empty() {
            return Err(RvError::Forbidden("Caller identity required".to_string()));
        }

        Ok(CallerId(AccountId::from(value)))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub group_id: GroupId,
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Default, Deserialize)]
pub struct JoinRoomRequest {
    #[serde(default)]
    pub password: Option<String>,
}

/// Body of the host actions naming a target user.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetUserRequest {
    pub user_id: AccountId,
}

#[derive(Debug, Serialize)]
pub struct JoinRoomResponse {
    pub outcome: &'static str,
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, RvError> {
    serde_json::from_slice(body).map_err(|e| {
        debug!(target: "rv.handlers.rooms", error = %e, "Invalid request body");
        RvError::BadRequest("Invalid request body".to_string())
    })
}

fn secret(password: Option<String>) -> Option<SecretString> {
    password.map(SecretString::from)
}

fn host_action(outcome: HostActionOutcome) -> Result<StatusCode, RvError> {
    match outcome {
        HostActionOutcome::Ok => Ok(StatusCode::NO_CONTENT),
        HostActionOutcome::NotAuthorized => Err(RvError::Forbidden(
            "Only the host may do that".to_string(),
        )),
    }
}

/// Handler for `POST /api/v1/rooms`.
///
/// - 201 Created: room created, caller joined as host
/// - 400 Bad Request: invalid body or room name
#[instrument(skip_all, name = "rv.api.rooms.create")]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    CallerId(caller): CallerId,
    body: Bytes,
) -> Result<(StatusCode, Json<Room>), RvError> {
    let request: CreateRoomRequest = parse_body(&body)?;
    let room = state
        .rooms
        .create_room(
            request.group_id,
            caller,
            &request.name,
            secret(request.password),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(room)))
}

/// Handler for `GET /api/v1/rooms/{room_id}`.
#[instrument(skip_all, name = "rv.api.rooms.get")]
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<RoomSnapshot>, RvError> {
    Ok(Json(state.rooms.get_room(&room_id).await?))
}

/// Handler for `POST /api/v1/rooms/{room_id}/join`.
///
/// The body is optional. Responds 200 on success, 403 for a wrong or
/// missing password and 410 when the room has ended.
#[instrument(skip_all, name = "rv.api.rooms.join")]
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    CallerId(caller): CallerId,
    body: Bytes,
) -> Result<(StatusCode, Json<JoinRoomResponse>), RvError> {
    let request: JoinRoomRequest = if body.is_empty() {
        JoinRoomRequest::default()
    } else {
        parse_body(&body)?
    };

    let outcome = state
        .rooms
        .join_room(&room_id, &caller, secret(request.password))
        .await?;

    let status = match outcome {
        JoinOutcome::Ok => StatusCode::OK,
        JoinOutcome::WrongPassword => StatusCode::FORBIDDEN,
        JoinOutcome::RoomEnded => StatusCode::GONE,
    };

    Ok((
        status,
        Json(JoinRoomResponse {
            outcome: outcome.as_str(),
        }),
    ))
}

/// Handler for `POST /api/v1/rooms/{room_id}/leave`.
#[instrument(skip_all, name = "rv.api.rooms.leave")]
pub async fn leave_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    CallerId(caller): CallerId,
) -> Result<StatusCode, RvError> {
    state.rooms.leave_room(&room_id, &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for `POST /api/v1/rooms/{room_id}/busy`.
#[instrument(skip_all, name = "rv.api.rooms.busy")]
pub async fn mark_busy(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    CallerId(caller): CallerId,
) -> Result<StatusCode, RvError> {
    state.rooms.mark_busy(&room_id, &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for `POST /api/v1/rooms/{room_id}/invite`.
#[instrument(skip_all, name = "rv.api.rooms.invite")]
pub async fn invite(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    CallerId(caller): CallerId,
    body: Bytes,
) -> Result<StatusCode, RvError> {
    let request: TargetUserRequest = parse_body(&body)?;
    host_action(
        state
            .rooms
            .invite(&room_id, &caller, &request.user_id)
            .await?,
    )
}

/// Handler for `POST /api/v1/rooms/{room_id}/kick`.
#[instrument(skip_all, name = "rv.api.rooms.kick")]
pub async fn kick(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    CallerId(caller): CallerId,
    body: Bytes,
) -> Result<StatusCode, RvError> {
    let request: TargetUserRequest = parse_body(&body)?;
    host_action(state.rooms.kick(&room_id, &caller, &request.user_id).await?)
}

/// Handler for `POST /api/v1/rooms/{room_id}/mute`.
#[instrument(skip_all, name = "rv.api.rooms.mute")]
pub async fn mute(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    CallerId(caller): CallerId,
    body: Bytes,
) -> Result<StatusCode, RvError> {
    let request: TargetUserRequest = parse_body(&body)?;
    host_action(state.rooms.mute(&room_id, &caller, &request.user_id).await?)
}

/// Handler for `POST /api/v1/rooms/{room_id}/end`.
#[instrument(skip_all, name = "rv.api.rooms.end")]
pub async fn end_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    CallerId(caller): CallerId,
) -> Result<StatusCode, RvError> {
    host_action(state.rooms.end_room(&room_id, &caller).await?)
}

/// Handler for `POST /api/v1/rooms/{room_id}/activity`.
#[instrument(skip_all, name = "rv.api.rooms.activity")]
pub async fn record_activity(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    CallerId(caller): CallerId,
) -> Result<StatusCode, RvError> {
    state.rooms.record_activity(&room_id, &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}
