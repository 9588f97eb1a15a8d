//! WebSocket transport.
//!
//! Each socket gets one worker per conversation so that commands for a
//! conversation run in arrival order while different conversations run
//! concurrently.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use relay_session::SessionRegistry;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    dispatch::dispatch,
    protocol::{ClientMessage, ServerMessage},
};

/// WebSocket handler state.
#[derive(Debug, Clone)]
pub struct WsState {
    pub registry: Arc<SessionRegistry>,
    /// Reply text budget per chunk.
    pub max_output_chars: usize,
}

impl WsState {
    #[must_use]
    pub const fn new(registry: Arc<SessionRegistry>, max_output_chars: usize) -> Self {
        Self {
            registry,
            max_output_chars,
        }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut workers: HashMap<String, (mpsc::UnboundedSender<ClientMessage>, JoinHandle<()>)> = HashMap::new();

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(ServerMessage::Error {
                    conversation_id: None,
                    message: format!("Invalid message: {e}"),
                });
                continue;
            }
        };

        let Some(conversation_id) = client_msg.conversation_id().map(str::to_string) else {
            let _ = tx.send(dispatch(&state.registry, client_msg, state.max_output_chars).await);
            continue;
        };

        let (worker_tx, _) = workers
            .entry(conversation_id.clone())
            .or_insert_with(|| spawn_worker(state.clone(), tx.clone()));
        if worker_tx.send(client_msg).is_err() {
            tracing::warn!(conversation_id = %conversation_id, "Conversation worker stopped");
            workers.remove(&conversation_id);
        }
    }

    // Let in-flight commands finish and reply before closing.
    for (_, (worker_tx, handle)) in workers {
        drop(worker_tx);
        let _ = handle.await;
    }
    drop(tx);
    let _ = send_task.await;
}

fn spawn_worker(
    state: WsState,
    replies: mpsc::UnboundedSender<ServerMessage>,
) -> (mpsc::UnboundedSender<ClientMessage>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ClientMessage>();
    let handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let reply = dispatch(&state.registry, msg, state.max_output_chars).await;
            if replies.send(reply).is_err() {
                break;
            }
        }
    });
    (tx, handle)
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(WsState::new(registry, 3500)));
/// ```
#[must_use]
pub fn create_ws_router(state: WsState) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state)
}
