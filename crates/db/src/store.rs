use chrono::{DateTime, Utc};
use clearquote_core::{ConversationState, ExtractedData, Message};
use sqlx::{sqlite::SqliteRow, Row};
use thiserror::Error;

use crate::DbPool;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Durable record of conversations, transcript messages, and extracted
/// quote data. The store owns all durable state; callers serialize
/// access per conversation through the lock table.
#[derive(Clone)]
pub struct ConversationStore {
    pool: DbPool,
}

impl ConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Idempotency lookup: has this provider message id been stored?
    pub async fn message_exists(&self, message_id: &str) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM messages WHERE id = ?")
            .bind(message_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The last `limit` messages for a conversation in chronological
    /// order (fetched newest-first, then reversed).
    pub async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, created_at
             FROM messages
             WHERE conversation_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(conversation_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut messages =
            rows.iter().map(decode_message).collect::<Result<Vec<_>, StoreError>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Create the conversation row if absent; an existing row (and its
    /// state) is left untouched.
    pub async fn ensure_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO conversations (id, status, created_at, updated_at)
             VALUES (?, 'ACTIVE', ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(conversation_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `None` when no conversation row exists for the identifier.
    pub async fn conversation_state(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationState>, StoreError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM conversations WHERE id = ?")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await?;

        status
            .map(|raw| raw.parse::<ConversationState>().map_err(|e| StoreError::Decode(e.to_string())))
            .transpose()
    }

    pub async fn pause_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE conversations SET status = 'PAUSED', updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Latest write wins; no history retained.
    pub async fn upsert_extracted_data(
        &self,
        conversation_id: &str,
        data: &ExtractedData,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(data)
            .map_err(|e| StoreError::Decode(format!("extracted data serialization: {e}")))?;
        sqlx::query(
            "INSERT INTO extracted_data (conversation_id, payload_json, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(conversation_id) DO UPDATE
             SET payload_json = excluded.payload_json, updated_at = excluded.updated_at",
        )
        .bind(conversation_id)
        .bind(&payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn extracted_data(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ExtractedData>, StoreError> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload_json FROM extracted_data WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await?;

        payload
            .map(|raw| {
                serde_json::from_str(&raw)
                    .map_err(|e| StoreError::Decode(format!("extracted data payload: {e}")))
            })
            .transpose()
    }
}

fn decode_message(row: &SqliteRow) -> Result<Message, StoreError> {
    let role: String = row.try_get("role")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        role: role.parse().map_err(|e: clearquote_core::domain::message::ParseMessageRoleError| {
            StoreError::Decode(e.to_string())
        })?,
        content: row.try_get("content")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| StoreError::Decode(format!("created_at timestamp: {e}")))?
            .with_timezone(&Utc),
    })
}
