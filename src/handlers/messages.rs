use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::error;

use crate::AppState;

/// Default page size for conversation history
const DEFAULT_HISTORY_LIMIT: i64 = 50;
/// Hard cap so a client cannot request unbounded history
const MAX_HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// Conversation history between a pair of users, in either direction,
/// ascending chronological, most recent `limit` messages.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path((user_id, other_id)): Path<(i64, i64)>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    match state
        .repository
        .get_conversation(user_id, other_id, limit)
        .await
    {
        Ok(messages) => Json(messages).into_response(),
        Err(err) => {
            error!(user_id, other_id, "failed to load conversation: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "failed to load messages" })),
            )
                .into_response()
        }
    }
}
