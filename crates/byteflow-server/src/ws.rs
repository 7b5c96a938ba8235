//! WebSocket progress channel endpoint.
//!
//! Each connection binds one client id to a live event stream. Outbound
//! traffic is the client's [`ProgressEvent`] feed; inbound `ping` and
//! `get_status` control messages are dispatched to the shared channel.
//! A reconnect under the same client id replaces the previous connection.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};

use byteflow_core::events::ClientMessage;
use byteflow_core::state::AppState;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

pub async fn handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

async fn handle_socket(socket: WebSocket, client_id: String, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (generation, mut events) = state.channel.subscribe(&client_id).await;

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    keepalive.tick().await; // first tick fires immediately

    tracing::info!("[WebSocket] Client {} connected", client_id);

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(p) => p,
                            Err(e) => {
                                tracing::warn!("[WebSocket] Failed to serialize event: {}", e);
                                continue;
                            }
                        };
                        if ws_sink.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    // A reconnect replaced this connection's subscription.
                    None => break,
                }
            }
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => {
                                state
                                    .channel
                                    .handle_inbound(&client_id, message, &state.tasks)
                                    .await;
                            }
                            Err(e) => {
                                tracing::debug!(
                                    "[WebSocket] Client {} sent unrecognized message: {}",
                                    client_id,
                                    e
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("[WebSocket] Client {} stream error: {}", client_id, e);
                        break;
                    }
                }
            }
            _ = keepalive.tick() => {
                if ws_sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    // Generation-checked: a no-op if a reconnect already owns the client id,
    // no matter which select branch ended this connection.
    state.channel.unsubscribe(&client_id, generation).await;
    tracing::info!("[WebSocket] Client {} disconnected", client_id);
}
