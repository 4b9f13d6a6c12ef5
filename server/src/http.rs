//! HTTP surface: the WebSocket endpoint plus two small REST routes
//! for monitoring.
//!
//! Each accepted socket gets a writer task draining its outbound
//! channel, while the accepting task runs the read loop. Events are
//! JSON text frames in both directions. A frame that fails to parse
//! is logged and dropped; the connection stays up.

use crate::rooms::{RoomStore, RoomSummary};
use crate::session::{self, Conn};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use serde_json::json;
use shared::{ClientEvent, ServerEvent};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RoomStore>,
    pub teacher_secret: Arc<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/api/rooms", get(list_rooms))
        .route("/api/health", get(health))
        .with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    Json(state.store.room_summaries().await)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "rooms": state.store.len().await,
    }))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = state.store.next_conn_id();
    debug!("connection {} opened", conn_id);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (sender, mut outbound) = mpsc::unbounded_channel::<ServerEvent>();

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            match serde_json::to_string(&event) {
                Ok(text) => {
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!("connection {}: failed to encode event: {}", conn_id, err),
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut conn = Conn::new(conn_id);
    while let Some(message) = ws_rx.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!("connection {}: socket error: {}", conn_id, err);
                break;
            }
        };
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    session::handle_event(&state.store, &state.teacher_secret, &mut conn, &sender, event)
                        .await
                }
                Err(err) => {
                    debug!("connection {}: ignoring malformed frame: {}", conn_id, err)
                }
            },
            Message::Close(_) => break,
            // Ping and pong are answered by the protocol layer.
            _ => {}
        }
    }

    session::handle_disconnect(&state.store, &mut conn).await;
    drop(sender);
    let _ = writer.await;
    debug!("connection {} closed", conn_id);
}
