//! Realtime WebSocket endpoint.
//!
//! Route: GET /api/ws
//!
//! Protocol (JSON text frames):
//!   server → `{"event":"connection_established","data":{"socket_id":…}}`
//!   client → `{"event":"subscribe","channel":"{env}.user.{id}"}`
//!   server → `subscription_succeeded` / `subscription_error`
//!   client → `{"event":"unsubscribe","channel":…}` / `{"event":"ping"}`

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use super::{encode_frame, new_socket_id, ChannelHub, SocketSender};
use crate::auth::{self, Principal};
use crate::errors::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    /// Browsers cannot set headers on a WebSocket handshake.
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientFrame {
    event: String,
    channel: Option<String>,
}

/// GET /api/ws
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let raw = auth::bearer_token(&headers)
        .map(str::to_string)
        .or(query.token)
        .ok_or(AppError::Unauthenticated)?;

    let principal = auth::authenticate(&state.db, &raw).await?;
    let hub = state.hub.clone();

    Ok(ws.on_upgrade(move |socket| session(socket, hub, principal)))
}

async fn session(socket: WebSocket, hub: ChannelHub, principal: Principal) {
    let socket_id = new_socket_id();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let (mut sink, mut stream) = socket.split();

    tracing::info!(user_id = principal.user_id, socket_id = %socket_id, "realtime: socket connected");

    send_frame(&tx, "connection_established", None, json!({ "socket_id": socket_id }));

    let outbound = async {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    };

    let inbound = async {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => handle_client_frame(&hub, &principal, &socket_id, &tx, &text),
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = outbound => {},
        _ = inbound => {},
    }

    hub.unsubscribe_all(&socket_id);
    tracing::info!(user_id = principal.user_id, socket_id = %socket_id, "realtime: socket closed");
}

fn handle_client_frame(
    hub: &ChannelHub,
    principal: &Principal,
    socket_id: &str,
    tx: &SocketSender,
    text: &str,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            send_frame(tx, "error", None, json!({ "message": format!("invalid frame: {}", e) }));
            return;
        }
    };

    match (frame.event.as_str(), frame.channel.as_deref()) {
        ("subscribe", Some(channel)) => {
            if hub.authorize_channel(principal.user_id, channel) {
                hub.subscribe(channel, socket_id, tx.clone());
                send_frame(tx, "subscription_succeeded", Some(channel), json!({}));
            } else {
                tracing::warn!(
                    user_id = principal.user_id,
                    channel,
                    "realtime: subscription denied"
                );
                send_frame(tx, "subscription_error", Some(channel), json!({ "status": 403 }));
            }
        }
        ("unsubscribe", Some(channel)) => hub.unsubscribe(channel, socket_id),
        ("ping", _) => send_frame(tx, "pong", None, json!({})),
        (event, _) => {
            send_frame(tx, "error", None, json!({ "message": format!("unsupported event '{}'", event) }));
        }
    }
}

fn send_frame(tx: &SocketSender, event: &str, channel: Option<&str>, data: serde_json::Value) {
    match encode_frame(event, channel, &data) {
        Ok(text) => {
            let _ = tx.send(text);
        }
        Err(e) => tracing::warn!(event, error = %e, "realtime: failed to encode frame"),
    }
}
