use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::Row;

use crate::models::StoredMessage;

use super::MessageRepository;

impl MessageRepository {
    /// Persist a message and return the canonical stored record with the
    /// server-assigned id and timestamp.
    pub async fn insert_message(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content: &str,
    ) -> Result<StoredMessage> {
        let created_at = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO messages (content, sender_id, receiver_id, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(content)
        .bind(sender_id)
        .bind(receiver_id)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert message")?;

        Ok(StoredMessage {
            id: result.last_insert_rowid(),
            content: content.to_string(),
            sender_id,
            receiver_id,
            created_at,
        })
    }

    /// Get the most recent `limit` messages between the pair, in either
    /// direction, returned oldest-first.
    pub async fn get_conversation(
        &self,
        user_a: i64,
        user_b: i64,
        limit: i64,
    ) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, content, sender_id, receiver_id, created_at
            FROM messages
            WHERE (sender_id = ? AND receiver_id = ?)
               OR (sender_id = ? AND receiver_id = ?)
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .bind(user_b)
        .bind(user_a)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load conversation")?;

        let mut messages: Vec<StoredMessage> = rows
            .into_iter()
            .map(|r| StoredMessage {
                id: r.get("id"),
                content: r.get("content"),
                sender_id: r.get("sender_id"),
                receiver_id: r.get("receiver_id"),
                created_at: r.get("created_at"),
            })
            .collect();

        // Reverse so oldest is first (natural reading order)
        messages.reverse();

        Ok(messages)
    }
}
