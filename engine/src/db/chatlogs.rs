/// Chat history persistence
///
/// Every message exchanged in a conversation, including the system notes that
/// introduce question batches, tagged with the stage it belongs to. Message ids
/// are assigned per chat, in order.
use anyhow::{anyhow, Context, Result};
use sqlx::{Row, SqlitePool};

use super::unix_now;
use crate::llm::{Message, MessageRole};

/// Repository for chat history
pub struct ChatLogRepository {
    pool: SqlitePool,
}

impl ChatLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a message to a chat's history
    pub async fn add_message(
        &self,
        chat_id: i64,
        role: MessageRole,
        text: &str,
        stage_index: usize,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chatlogs (chat_id, message_id, role, message_text, stage_id, created_at)
            SELECT ?, COALESCE(MAX(message_id), 0) + 1, ?, ?, ?, ?
            FROM chatlogs
            WHERE chat_id = ?
            "#,
        )
        .bind(chat_id)
        .bind(role.as_str())
        .bind(text)
        .bind(stage_index as i64)
        .bind(unix_now()?)
        .bind(chat_id)
        .execute(&self.pool)
        .await
        .context("Failed to add chat message")?;

        Ok(())
    }

    /// Full history of a chat, oldest first
    pub async fn messages(&self, chat_id: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT role, message_text FROM chatlogs WHERE chat_id = ? ORDER BY message_id",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load chat history")?;

        rows.iter().map(to_message).collect()
    }

    /// History of one stage of a chat, oldest first
    pub async fn stage_messages(&self, chat_id: i64, stage_index: usize) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT role, message_text FROM chatlogs
            WHERE chat_id = ? AND stage_id = ?
            ORDER BY message_id
            "#,
        )
        .bind(chat_id)
        .bind(stage_index as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load stage history")?;

        rows.iter().map(to_message).collect()
    }

    /// Number of messages in a chat
    pub async fn count(&self, chat_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chatlogs WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count chat messages")?;
        Ok(count)
    }
}

fn to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message> {
    let role: String = row.get("role");
    let role = role.parse::<MessageRole>().map_err(|e| anyhow!(e))?;
    Ok(Message {
        role,
        content: row.get("message_text"),
    })
}
