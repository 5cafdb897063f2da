use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use warp::ws::{Message, WebSocket};

use crate::proctoring::{ConnectionHandle, ProctoringServer, ProctoringSignalingHandler};

pub async fn handle_proctoring_websocket(websocket: WebSocket, server: Arc<ProctoringServer>) {
    let (connection, mut rx) = ConnectionHandle::channel(server.config().outbound_buffer);
    let connection_id = connection.id();
    tracing::info!(connection_id = %connection_id, "New proctoring WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let mut signaling_handler = ProctoringSignalingHandler::new(server, connection);

    // Spawn task to send events to client
    let sender_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, event = event.name(), "Failed to encode event");
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::text(text)).await {
                tracing::debug!(connection_id = %connection_id, error = %e, "Failed to send WebSocket message");
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
                handle_websocket_message(&mut signaling_handler, message).await;
            }
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    signaling_handler.cleanup().await;
    sender_task.abort();
    tracing::info!(connection_id = %connection_id, "Proctoring WebSocket connection closed");
}

async fn handle_websocket_message(signaling_handler: &mut ProctoringSignalingHandler, message: Message) {
    // Binary and control frames carry no events
    if let Ok(text) = message.to_str() {
        signaling_handler.handle_text(text).await;
    }
}
