//! Push channel listener.
//!
//! Maintains a WebSocket connection to the server and fires a sync
//! trigger whenever another client's change is announced. The channel is
//! purely a latency optimization: if it is down, the scheduled cycles
//! still converge via the pull API, so all failures here just back off
//! and reconnect.

use crate::api::ApiClient;
use crate::error::{ClientError, ClientResult};
use driftsync_core::{ClientId, ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Run the push listener until cancelled, reconnecting with backoff.
pub async fn run_push_listener(
    api: ApiClient,
    client_id: ClientId,
    triggers: mpsc::Sender<()>,
    token: CancellationToken,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if token.is_cancelled() {
            break;
        }

        match listen_once(&api, &client_id, &triggers, &token).await {
            Ok(()) => {
                // Clean close (or cancellation); reconnect promptly.
                backoff = INITIAL_BACKOFF;
            }
            Err(e) => {
                warn!(error = %e, "push channel failed, reconnecting in {backoff:?}");
            }
        }

        if token.is_cancelled() {
            break;
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }

    info!("push listener stopped");
}

async fn listen_once(
    api: &ApiClient,
    client_id: &ClientId,
    triggers: &mpsc::Sender<()>,
    token: &CancellationToken,
) -> ClientResult<()> {
    let url = api.push_channel_url(client_id)?;
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ClientError::Internal(format!("bad push channel request: {e}")))?;
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", api.token())
            .parse()
            .map_err(|_| ClientError::Internal("invalid token header".to_string()))?,
    );

    let (ws, _) = connect_async(request)
        .await
        .map_err(|e| ClientError::Internal(format!("push channel connect: {e}")))?;
    info!("push channel connected");

    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(());
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(ServerMessage::FileEvent { event }) => {
                                debug!(path = %event.path, kind = %event.kind, "remote change announced");
                                // A full trigger channel means a sync is
                                // already queued up; dropping is fine.
                                let _ = triggers.try_send(());
                            }
                            Ok(ServerMessage::Ping) => {
                                let pong = serde_json::to_string(&ClientMessage::Pong)
                                    .map_err(|e| ClientError::Internal(e.to_string()))?;
                                sink.send(Message::Text(pong.into()))
                                    .await
                                    .map_err(|e| ClientError::Internal(e.to_string()))?;
                            }
                            Ok(ServerMessage::Pong | ServerMessage::Ack) => {}
                            Err(e) => {
                                debug!(error = %e, "ignoring unparseable push frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        sink.send(Message::Pong(payload))
                            .await
                            .map_err(|e| ClientError::Internal(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(ClientError::Internal(format!("push channel receive: {e}")));
                    }
                }
            }
        }
    }
}
