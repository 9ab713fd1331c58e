use std::sync::Arc;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};

use crate::relay::{ServerEvent, SessionGateway};

pub async fn handle_session_websocket(
    websocket: WebSocket,
    gateway: Arc<SessionGateway>,
) {
    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let connection_id = gateway.connect(tx).await;
    tracing::info!(connection_id = %connection_id, "New session WebSocket connection established");

    // Spawn task to send events to client
    let sender_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.to_text() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, event = event.name(), "Failed to serialize event");
                    continue;
                }
            };

            if let Err(e) = ws_sender.send(Message::text(text)).await {
                tracing::error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                if message.is_close() {
                    break;
                }
                if let Ok(text) = message.to_str() {
                    tracing::trace!(connection_id = %connection_id, "Received frame: {}", text);
                    gateway.handle_text(&connection_id, text).await;
                }
            }
            Err(e) => {
                tracing::error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    gateway.disconnect(&connection_id).await;
    sender_task.abort();
    tracing::info!(connection_id = %connection_id, "Session WebSocket connection closed");
}
