use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A persisted chat message. The id and timestamp are assigned by the server
/// at persistence time; the record is immutable after that.
///
/// Serialized with camelCase field names to match the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: i64,
    pub content: String,
    pub sender_id: i64,
    pub receiver_id: i64,
    /// Unix epoch seconds
    pub created_at: i64,
}
