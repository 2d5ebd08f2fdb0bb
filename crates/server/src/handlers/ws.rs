//! Push channel WebSocket handler.
//!
//! One logical channel per connected client. The socket task forwards bus
//! notifications outbound and answers keep-alive probes; it owns both
//! directions and unregisters the client when either closes.

use crate::auth::Principal;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use driftsync_core::{ClientId, ClientMessage, ServerMessage};
use serde::Deserialize;
use tracing::{debug, warn};

/// Query parameters for the push channel.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub client_id: String,
}

/// Upgrade to the push channel.
pub async fn ws_handler(
    State(state): State<AppState>,
    principal: Principal,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let client_id = ClientId::parse(&params.client_id)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    debug!(owner_id = %principal.owner_id, client_id = %client_id, "push channel upgrade");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, client_id)))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, client_id: ClientId) {
    let mut notifications = state.notifier.register(client_id).await;

    loop {
        tokio::select! {
            notification = notifications.recv() => {
                // None means the bus replaced or dropped this subscriber.
                let Some(message) = notification else { break };
                let Ok(text) = serde_json::to_string(&message) else { continue };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Ping) => {
                                let Ok(pong) = serde_json::to_string(&ServerMessage::Pong) else {
                                    continue;
                                };
                                if socket.send(Message::Text(pong.into())).await.is_err() {
                                    break;
                                }
                            }
                            Ok(ClientMessage::Pong) => {}
                            Err(e) => {
                                warn!(client_id = %client_id, error = %e, "unparseable push channel frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(client_id = %client_id, error = %e, "push channel receive error");
                        break;
                    }
                }
            }
        }
    }

    state.notifier.unregister(&client_id).await;
    debug!(client_id = %client_id, "push channel closed");
}
