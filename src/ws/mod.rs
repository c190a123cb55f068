pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::net::SocketAddr;

use crate::abuse::IpSlot;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use crate::types::ConnectionId;

/// Per-connection context threaded through message handling.
/// Host authorization lives here: it is bound to this socket and a
/// reconnecting host has to authenticate again.
pub struct ConnCtx {
    pub connection_id: ConnectionId,
    pub is_host: bool,
    pub joined: bool,
}

/// WebSocket upgrade handler with per-address admission control
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let Some(slot) = state.conn_limits.try_acquire(addr.ip()) else {
        tracing::warn!("Rejecting connection from {}: per-address limit reached", addr.ip());
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "code": "TOO_MANY_CONNECTIONS",
                "msg": "Too many connections from this address",
            })),
        )
            .into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, addr, slot, state))
}

/// Handle one WebSocket connection for its whole lifetime
async fn handle_socket(socket: WebSocket, addr: SocketAddr, _slot: IpSlot, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let mut ctx = ConnCtx {
        connection_id: ulid::Ulid::new().to_string(),
        is_host: false,
        joined: false,
    };
    tracing::info!("Connection {} opened from {}", ctx.connection_id, addr.ip());

    // New connections get the current picture right away; everything after
    // that arrives via the broadcast channel
    let snapshot = state.game_state_message().await;
    if let Ok(json) = serde_json::to_string(&snapshot) {
        if sender.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    let mut broadcast_rx = state.broadcast.subscribe();

    loop {
        tokio::select! {
            broadcast_msg = broadcast_rx.recv() => {
                // A lagged receiver skips ahead; the next state broadcast
                // catches it up
                if let Ok(msg) = broadcast_msg {
                    if let Ok(json) = serde_json::to_string(&msg) {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }

            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if let Some(response) =
                                    handlers::handle_message(client_msg, &mut ctx, &state).await
                                {
                                    if let Ok(json) = serde_json::to_string(&response) {
                                        if sender.send(Message::Text(json.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::debug!(
                                    "Unparseable message from {}: {}",
                                    ctx.connection_id,
                                    e
                                );
                                let error = ServerMessage::Error {
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("Invalid message format: {}", e),
                                };
                                if let Ok(json) = serde_json::to_string(&error) {
                                    let _ = sender.send(Message::Text(json.into())).await;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("Socket error on {}: {}", ctx.connection_id, e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.handle_disconnect(&ctx.connection_id).await;
    tracing::info!("Connection {} closed", ctx.connection_id);
}
