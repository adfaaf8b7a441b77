// =============================================================================
// WebSocket Handler — Push feed of produced events
// =============================================================================
//
// Clients connect to `/api/v1/ws?token=<token>` and receive:
//   1. An immediate `{type: "snapshot", payload: StateSnapshot}` on connect.
//   2. Every produced event (`strategy.selection.decision`,
//      `strategy.bandit.state`, `strategy.bandit.metrics`) as it is published.
//
// A client that falls behind the broadcast buffer gets a fresh snapshot in
// place of the events it missed.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::auth::validate_token;
use crate::app_state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !validate_token(&token) {
        warn!("WebSocket connection rejected: invalid token");
        return (StatusCode::FORBIDDEN, "Invalid or missing token").into_response();
    }

    info!("WebSocket connection accepted");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
        .into_response()
}

async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let session = Uuid::new_v4();
    info!(%session, "WebSocket session opened");
    let (mut sender, mut receiver) = socket.split();
    // Subscribe before the snapshot so nothing published in between is lost.
    let mut feed = state.bus.subscribe();

    if let Err(e) = send_snapshot(&mut sender, &state).await {
        warn!(%session, error = %e, "Failed to send initial WebSocket snapshot");
        return;
    }

    loop {
        tokio::select! {
            // ── Push: forward every produced event ──────────────────────
            event = feed.recv() => {
                let result = match event {
                    Ok(event) => send_json(&mut sender, &state, &event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(%session, missed, "WebSocket client lagged, resending snapshot");
                        send_snapshot(&mut sender, &state).await
                    }
                    Err(RecvError::Closed) => {
                        info!("event bus closed, ending WebSocket session");
                        break;
                    }
                };
                if let Err(e) = result {
                    debug!(%session, error = %e, "WebSocket send failed, disconnecting");
                    break;
                }
            }

            // ── Recv: control frames only ───────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(%session, "WebSocket closed by client");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(%session, error = %e, "WebSocket receive error, disconnecting");
                        break;
                    }
                }
            }
        }
    }
}

async fn send_snapshot<S>(sender: &mut S, state: &Arc<AppState>) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let snapshot = state.build_snapshot();
    let framed = serde_json::json!({ "type": "snapshot", "payload": snapshot });
    send_json(sender, state, &framed).await
}

async fn send_json<S, T>(sender: &mut S, state: &Arc<AppState>, value: &T) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
    T: Serialize,
{
    match serde_json::to_string(value) {
        Ok(json) => {
            let seq = state.ws_sequence_number.fetch_add(1, Ordering::Relaxed);
            sender.send(Message::Text(json.into())).await?;
            debug!(seq, "WebSocket message sent");
            Ok(())
        }
        Err(e) => {
            // Not a transport failure; keep the connection.
            warn!(error = %e, "Failed to serialize WebSocket message");
            Ok(())
        }
    }
}
