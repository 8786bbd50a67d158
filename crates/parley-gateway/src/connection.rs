//! WebSocket connection lifecycle: register, read loop, cleanup.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use parley_core::protocol::OutboundEvent;
use parley_core::types::PipelineMode;

use crate::session::{Session, SessionOutbox};
use crate::state::{ConnectionState, GatewayState};

/// Handle a new WebSocket connection serving `mode` requests.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket, mode: PipelineMode) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, mode = %mode, "New WebSocket connection");

    let (mut ws_tx, mut ws_rx) = ws.split();

    // Create event channel for this connection
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<String>();
    let outbox = SessionOutbox::new(event_tx);

    {
        let mut connections = state.connections.write().await;
        connections.insert(
            conn_id.clone(),
            ConnectionState {
                conn_id: conn_id.clone(),
                mode,
                connected_at: chrono::Utc::now(),
            },
        );
    }
    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_connect();

    let session = Session::new(conn_id.clone(), mode, state.orchestrator.clone(), outbox.clone());

    // Spawn event sender task
    let send_task = tokio::spawn(async move {
        while let Some(msg) = event_rx.recv().await {
            if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Main read loop
    while let Some(msg_result) = ws_rx.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                session.receive(text.to_string()).await;
            }
            Ok(Message::Binary(_)) => {
                debug!(conn_id = %conn_id, "Binary frame received, expected JSON text");
                let _ = outbox.deliver(&OutboundEvent::error(
                    "Invalid message format: expected a JSON text frame",
                ));
            }
            Ok(Message::Ping(_)) => {
                // Axum handles ping/pong automatically
            }
            Ok(Message::Close(_)) => {
                debug!(conn_id = %conn_id, "Client requested close");
                break;
            }
            Err(e) => {
                error!(conn_id = %conn_id, %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    // In-flight requests keep running; their events are dropped from here on.
    outbox.close();
    send_task.abort();
    cleanup_connection(&state, &conn_id).await;
    info!(conn_id = %conn_id, "WebSocket connection closed");
}

async fn cleanup_connection(state: &Arc<GatewayState>, conn_id: &str) {
    let mut connections = state.connections.write().await;
    connections.remove(conn_id);
    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_disconnect();
}
