//! Live job notifications over WebSocket.
//!
//! Every notification published while the client is connected is sent as a JSON text message.

use crate::api::AppState;
use axum::{
    body::Bytes,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use std::time::Duration;
use tubedrop_core::hub::Subscription;

/// Heartbeat ping interval in seconds.
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// `GET /ws`
pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.service.subscribe()))
}

async fn handle_socket(socket: WebSocket, mut subscription: Subscription) {
    debug!("Client {} connected", subscription.id());

    let (mut sender, mut receiver) = socket.split();
    let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    // The first tick completes immediately
    heartbeat.tick().await;
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            notification = subscription.recv() => {
                let Some(notification) = notification else {
                    warn!("Client {} fell behind and was dropped", subscription.id());
                    break;
                };
                let text = match serde_json::to_string(&notification) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode notification: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            _ = heartbeat.tick() => {
                if awaiting_pong {
                    debug!("Client {} failed to respond to Ping", subscription.id());
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }
        }
    }

    debug!("Client {} disconnected", subscription.id());
}
