//! Player websocket: the untrusted, receive-only display.
//!
//! DESIGN
//! ======
//! The surface never sends commands. On attach it receives a full resync,
//! then every filtered push for its map, serialized as tagged JSON
//! (`{"type": "tokens-update", ...}`). Anything it sends except a close is
//! ignored. When the map's session is evicted (map deleted) the message
//! channel closes and the socket is closed with it.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services;
use crate::services::sync::PlayerMessage;
use crate::state::AppState;

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(map_id) = params.get("map_id").and_then(|s| s.parse::<Uuid>().ok()) else {
        return (StatusCode::BAD_REQUEST, "map_id required").into_response();
    };

    match services::map::get_map(&state, map_id).await {
        Ok(_) => ws.on_upgrade(move |socket| run_ws(socket, state, map_id)),
        Err(e) if matches!(&e, services::map::MapError::Store(s) if s.is_not_found()) => {
            (StatusCode::NOT_FOUND, "map not found").into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, %map_id, "player ws: map lookup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "map lookup failed").into_response()
        }
    }
}

async fn run_ws(mut socket: WebSocket, state: AppState, map_id: Uuid) {
    let client_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<PlayerMessage>(state.config.player_channel_capacity);

    if let Err(e) = services::map::attach_player(&state, map_id, client_id, tx).await {
        warn!(error = %e, %map_id, "player ws: attach failed");
        return;
    }
    info!(%client_id, %map_id, "player ws: surface connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            message = rx.recv() => {
                let Some(message) = message else { break };
                if send_message(&mut socket, &message).await.is_err() {
                    break;
                }
            }
        }
    }

    services::map::part_player(&state, map_id, client_id).await;
    info!(%client_id, %map_id, "player ws: surface disconnected");
}

async fn send_message(socket: &mut WebSocket, message: &PlayerMessage) -> Result<(), ()> {
    let json = match serde_json::to_string(message) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, kind = message.kind(), "player ws: failed to serialize message");
            return Err(());
        }
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}
