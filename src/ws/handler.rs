//! WebSocket Handler
//!
//! Bridges one accepted socket to its relay session: a sender task draining
//! the outbound channel and an input loop feeding frames to the state machine.

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::metrics::ServerMetrics;
use crate::repository::MessageRepository;

use super::protocol::ServerEvent;
use super::registry::ConnectionRegistry;
use super::relay::RelaySession;

/// Handle one relay connection until the transport closes.
pub async fn handle_socket(
    socket: WebSocket,
    registry: Arc<ConnectionRegistry>,
    repository: MessageRepository,
    metrics: Arc<ServerMetrics>,
    send_channel_capacity: usize,
) {
    metrics.connection_opened();

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending events to the WebSocket
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(send_channel_capacity);

    let mut session = RelaySession::new(registry, repository, metrics.clone(), tx);
    info!(conn_id = %session.connection_id(), "new chat connection");

    // Task to serialize outbound events onto the socket
    let sender_task = async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    };

    // Task to feed incoming frames to the state machine
    let metrics_input = metrics.clone();
    let input_task = async {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    metrics_input.event_received();
                    session.handle_text(&text).await;
                }
                Ok(Message::Close(_)) => {
                    debug!("client closed connection");
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!("sender task ended"),
        _ = input_task => debug!("input task ended"),
    }

    // Registry cleanup happens exactly once, whichever task ended first
    session.close().await;
    metrics.connection_closed();
}
