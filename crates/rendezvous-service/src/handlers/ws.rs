//! Signaling WebSocket.
//!
//! One socket is one connection id. Text frames are decoded as
//! `ClientMessage` and dispatched to the coordinator or the room manager;
//! everything queued on the connection's outbox is written back as JSON text
//! frames by a dedicated writer task.
//!
//! A rejected frame is answered with an `error` event and never closes the
//! socket.

use crate::errors::RvError;
use crate::matching::{Candidate, Rating};
use crate::observability::metrics;
use crate::routes::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::signaling::{ClientMessage, RelayTarget, ServerEvent};
use common::types::{AccountId, ConnectionId};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    /// Account id of an authenticated user. Anonymous when absent.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Handler for `GET /ws`. Refuses new sockets while draining.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
) -> Response {
    if state.health.is_draining() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let account_id = params
        .user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .map(AccountId::from);

    ws.on_upgrade(move |socket| handle_socket(socket, state, account_id))
}

#[instrument(skip_all, name = "rv.ws.connection", fields(connection_id = tracing::field::Empty))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, account_id: Option<AccountId>) {
    let connection_id = ConnectionId::generate();
    tracing::Span::current().record("connection_id", connection_id.as_str());

    let mut outbox = state.relay.register(connection_id.clone()).await;
    state
        .presence
        .register(connection_id.clone(), account_id.clone())
        .await;
    state.health.connection_opened();
    metrics::ws_connection_opened();
    info!(
        target: "rv.ws",
        authenticated = account_id.is_some(),
        "Signaling connection opened"
    );

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            match event.encode() {
                Ok(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(target: "rv.ws", error = %e, event = event.label(), "Failed to encode event");
                }
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                dispatch_frame(&state, &connection_id, account_id.as_ref(), &text).await;
            }
            Ok(Message::Binary(_)) => {
                metrics::record_rejected_frame();
                reply_error(
                    &state,
                    &connection_id,
                    &RvError::BadRequest("Binary frames are not supported".to_string()),
                )
                .await;
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(e) => {
                debug!(target: "rv.ws", error = %e, "Socket read failed");
                break;
            }
        }
    }

    if let Err(e) = state.coordinator.disconnect(connection_id.clone()).await {
        warn!(target: "rv.ws", error = %e, "Coordinator cleanup failed");
    }
    state.relay.unregister(&connection_id).await;
    state.presence.unregister(&connection_id).await;
    state.health.connection_closed();
    metrics::ws_connection_closed();
    writer.abort();

    info!(target: "rv.ws", "Signaling connection closed");
}

/// Decode one client frame and act on it on behalf of `connection_id`.
///
/// Failures are reported back to the sender as an `error` event.
pub async fn dispatch_frame(
    state: &AppState,
    connection_id: &ConnectionId,
    account_id: Option<&AccountId>,
    frame: &str,
) {
    let message = match ClientMessage::decode(frame) {
        Ok(message) => message,
        Err(e) => {
            metrics::record_rejected_frame();
            debug!(target: "rv.ws", connection_id = %connection_id, error = %e, "Rejected client frame");
            reply_error(state, connection_id, &RvError::from(e)).await;
            return;
        }
    };

    if let Err(e) = handle_message(state, connection_id, account_id, message).await {
        reply_error(state, connection_id, &e).await;
    }
}

async fn handle_message(
    state: &AppState,
    connection_id: &ConnectionId,
    account_id: Option<&AccountId>,
    message: ClientMessage,
) -> Result<(), RvError> {
    let coordinator = &state.coordinator;

    match message {
        ClientMessage::Waiting(request) => {
            let candidate =
                Candidate::from_request(connection_id.clone(), account_id.cloned(), request);
            coordinator.enqueue(candidate).await?;
        }
        ClientMessage::LeaveWaiting => {
            coordinator.leave_waiting(connection_id.clone()).await?;
        }
        ClientMessage::Skip => {
            coordinator.skip(connection_id.clone()).await?;
        }
        ClientMessage::Stop => {
            coordinator.stop(connection_id.clone()).await?;
        }
        ClientMessage::Like { user_id } => {
            coordinator
                .rate(connection_id.clone(), user_id, Rating::Like)
                .await?;
        }
        ClientMessage::Dislike { user_id } => {
            coordinator
                .rate(connection_id.clone(), user_id, Rating::Dislike)
                .await?;
        }
        ClientMessage::Report {
            reported_user,
            reason,
        } => {
            coordinator
                .report(connection_id.clone(), reported_user, reason)
                .await?;
        }
        negotiation => {
            let Some(request) = negotiation.into_relay() else {
                return Ok(());
            };

            match request.target {
                RelayTarget::Partner(to) => {
                    coordinator
                        .relay(connection_id.clone(), to, request.payload)
                        .await?;
                }
                RelayTarget::RoomMember {
                    room_id,
                    account_id: to,
                } => {
                    let from = account_id.ok_or_else(|| {
                        RvError::Forbidden("Room signaling requires an account".to_string())
                    })?;
                    state
                        .rooms
                        .relay_in_room(&room_id, from, &to, request.payload)
                        .await?;
                }
            }
        }
    }

    Ok(())
}

async fn reply_error(state: &AppState, connection_id: &ConnectionId, err: &RvError) {
    match err {
        RvError::Store(_) | RvError::Internal(_) => {
            error!(target: "rv.ws", connection_id = %connection_id, error = %err, "Request failed");
        }
        _ => {
            debug!(target: "rv.ws", connection_id = %connection_id, error = %err, "Request rejected");
        }
    }

    state
        .relay
        .deliver(
            connection_id,
            ServerEvent::Error {
                code: err.error_code(),
                message: err.client_message(),
            },
        )
        .await;
}
