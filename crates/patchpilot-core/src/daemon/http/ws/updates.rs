use crate::{AgentService, UpdateEvent};
use axum::{
    extract::{
        Extension, Path,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// Push every update for `owner_id` as one JSON text frame.
pub async fn updates_handler(
    ws: WebSocketUpgrade,
    Path(owner_id): Path<String>,
    Extension(service): Extension<Arc<AgentService>>,
) -> impl IntoResponse {
    let updates = service.subscribe(&owner_id);
    ws.on_upgrade(move |socket| handle_socket(socket, owner_id, updates))
}

async fn handle_socket(
    socket: WebSocket,
    owner_id: String,
    mut updates: broadcast::Receiver<UpdateEvent>,
) {
    debug!(owner_id = %owner_id, "Update subscriber connected");
    let (mut sender, mut incoming) = socket.split();

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => {
                    let payload = match serde_json::to_string(&update) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(owner_id = %owner_id, error = %e, "Failed to encode update");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(owner_id = %owner_id, skipped, "Update subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
            frame = incoming.next() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(owner_id = %owner_id, "Update subscriber disconnected");
}
