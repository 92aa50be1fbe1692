use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use crate::AppState;
use crate::ws;

/// Upgrade `/ws` into a relay connection.
pub async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let registry = state.registry.clone();
    let repository = state.repository.as_ref().clone();
    let metrics = state.metrics.clone();
    let capacity = state.server_config.send_channel_capacity;

    ws.on_upgrade(move |socket| ws::handle_socket(socket, registry, repository, metrics, capacity))
}
