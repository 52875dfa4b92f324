use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::RoomId;
use crate::store::{RoomStore, RoomUpdate, Subscription};
use crate::websocket::message::{ClientFrame, ServerFrame};
use crate::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serve one client connection until it closes
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let client_id = Uuid::new_v4();
    tracing::info!("Client {} connected", client_id);

    // Single writer keeps replies and pushed snapshots in send order
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut forwarders: HashMap<RoomId, JoinHandle<()>> = HashMap::new();

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_text_message(&state, &tx, &mut forwarders, client_id, &text).await;
            }
            Ok(Message::Close(_)) => {
                tracing::info!("Client {} disconnected", client_id);
                break;
            }
            Ok(_) => {
                // Binary, ping and pong carry nothing for the room host
            }
            Err(e) => {
                tracing::warn!("WebSocket error for client {}: {}", client_id, e);
                break;
            }
        }
    }

    for (_, forwarder) in forwarders.drain() {
        forwarder.abort();
    }
    send_task.abort();
}

async fn handle_text_message(
    state: &AppState,
    tx: &UnboundedSender<Message>,
    forwarders: &mut HashMap<RoomId, JoinHandle<()>>,
    client_id: Uuid,
    text: &str,
) {
    let frame = match ClientFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("Unreadable frame from {}: {}", client_id, e);
            let _ = tx.send(ServerFrame::Error { message: e.to_string() }.to_ws_message());
            return;
        }
    };

    let store = &state.store;
    let reply = match frame {
        ClientFrame::Create { request_id, room } => match store.create_room(room).await {
            Ok(room) => ServerFrame::Room { request_id, room },
            Err(error) => ServerFrame::Failed { request_id, error },
        },
        ClientFrame::Read {
            request_id,
            room_id,
        } => match store.read(&room_id).await {
            Ok(room) => ServerFrame::Room { request_id, room },
            Err(error) => ServerFrame::Failed { request_id, error },
        },
        ClientFrame::Write {
            request_id,
            room_id,
            patch,
        } => ack_or_failed(request_id, store.write_fields(&room_id, patch).await),
        ClientFrame::Post {
            request_id,
            room_id,
            message,
        } => ack_or_failed(request_id, store.post_message(&room_id, message).await),
        ClientFrame::Subscribe {
            request_id,
            room_id,
        } => match store.subscribe(&room_id).await {
            Ok(subscription) => {
                // Ack goes out before the forwarder can push the first snapshot
                let _ = tx.send(ServerFrame::Ack { request_id }.to_ws_message());
                let forwarder = tokio::spawn(forward_updates(subscription, tx.clone()));
                if let Some(previous) = forwarders.insert(room_id.clone(), forwarder) {
                    previous.abort();
                }
                tracing::debug!("Client {} subscribed to {}", client_id, room_id);
                return;
            }
            Err(error) => ServerFrame::Failed { request_id, error },
        },
        ClientFrame::Unsubscribe { room_id } => {
            if let Some(forwarder) = forwarders.remove(&room_id) {
                forwarder.abort();
                tracing::debug!("Client {} unsubscribed from {}", client_id, room_id);
            }
            return;
        }
    };

    if let ServerFrame::Failed { error, .. } = &reply {
        tracing::debug!("Request from {} failed: {}", client_id, error);
    }
    let _ = tx.send(reply.to_ws_message());
}

fn ack_or_failed(request_id: u64, result: Result<(), StoreError>) -> ServerFrame {
    match result {
        Ok(()) => ServerFrame::Ack { request_id },
        Err(error) => ServerFrame::Failed { request_id, error },
    }
}

/// Relay one room's updates onto the client socket
async fn forward_updates(mut subscription: Subscription, tx: UnboundedSender<Message>) {
    let room_id = subscription.room_id().clone();
    while let Some(update) = subscription.next().await {
        let frame = match update {
            RoomUpdate::Snapshot(room) => ServerFrame::Snapshot {
                room_id: room_id.clone(),
                room,
            },
            RoomUpdate::Deleted => ServerFrame::Deleted {
                room_id: room_id.clone(),
            },
        };
        if tx.send(frame.to_ws_message()).is_err() {
            break;
        }
    }
}
