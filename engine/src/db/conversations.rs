/// Conversation state persistence
///
/// One row per chat holding the traversal cursor `(stage_id, batch_id)` and the
/// orchestrator's flags. `batch_id = -1` means the current stage has not
/// presented a batch yet.
use anyhow::{Context, Result};
use questionnaire::Cursor;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::unix_now;

/// Persisted state of one conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRecord {
    pub chat_id: i64,
    pub cursor: Cursor,
    /// The greeting was sent
    pub started: bool,
    /// The last stage was finished
    pub concluded: bool,
    /// The questions of the current stage were introduced to the model
    pub theme_set: bool,
}

impl ConversationRecord {
    /// State of a conversation that has not begun
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            cursor: Cursor::start(0),
            started: false,
            concluded: false,
            theme_set: false,
        }
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        let cursor = Cursor::from_row(row.get("stage_id"), row.get("batch_id"))?;
        Ok(Self {
            chat_id: row.get("chat_id"),
            cursor,
            started: row.get("is_started"),
            concluded: row.get("is_concluded"),
            theme_set: row.get("theme_set"),
        })
    }
}

/// Repository for conversation state
pub struct ConversationRepository {
    pool: SqlitePool,
}

impl ConversationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch a conversation, creating a fresh one on first contact
    pub async fn get_or_create(&self, chat_id: i64) -> Result<ConversationRecord> {
        if let Some(record) = self.get(chat_id).await? {
            return Ok(record);
        }

        let record = ConversationRecord::new(chat_id);
        self.save(&record).await?;
        Ok(record)
    }

    /// Fetch a conversation
    pub async fn get(&self, chat_id: i64) -> Result<Option<ConversationRecord>> {
        let row = sqlx::query(
            r#"
            SELECT chat_id, stage_id, batch_id, is_started, is_concluded, theme_set
            FROM conversations
            WHERE chat_id = ?
            "#,
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load conversation")?;

        row.as_ref().map(ConversationRecord::from_row).transpose()
    }

    /// Write the full state of a conversation
    pub async fn save(&self, record: &ConversationRecord) -> Result<()> {
        let (stage_id, batch_id) = record.cursor.to_row();

        sqlx::query(
            r#"
            INSERT INTO conversations
                (chat_id, stage_id, batch_id, is_started, is_concluded, theme_set, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chat_id) DO UPDATE SET
                stage_id = excluded.stage_id,
                batch_id = excluded.batch_id,
                is_started = excluded.is_started,
                is_concluded = excluded.is_concluded,
                theme_set = excluded.theme_set,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.chat_id)
        .bind(stage_id)
        .bind(batch_id)
        .bind(record.started)
        .bind(record.concluded)
        .bind(record.theme_set)
        .bind(unix_now()?)
        .execute(&self.pool)
        .await
        .context("Failed to save conversation")?;

        Ok(())
    }

    /// Forget a conversation: reset its state and drop its history and answers
    pub async fn restart(&self, chat_id: i64) -> Result<ConversationRecord> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chatlogs WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear chat history")?;

        sqlx::query("DELETE FROM answers WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear answers")?;

        sqlx::query("DELETE FROM conversations WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&mut *tx)
            .await
            .context("Failed to reset conversation")?;

        tx.commit().await?;

        let record = ConversationRecord::new(chat_id);
        self.save(&record).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::llm::MessageRole;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
        (temp_dir, db)
    }

    #[tokio::test]
    async fn test_first_contact_creates_record() {
        let (_dir, db) = setup().await;
        let repo = db.conversations();

        let record = repo.get_or_create(42).await.unwrap();

        assert_eq!(record, ConversationRecord::new(42));
        assert_eq!(record.cursor.to_row(), (0, -1));
        assert!(repo.get(42).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cursor_round_trips_unchanged() {
        let (_dir, db) = setup().await;
        let repo = db.conversations();

        let mut record = repo.get_or_create(7).await.unwrap();
        record.cursor = Cursor {
            stage_index: 2,
            batch_index: Some(5),
        };
        record.started = true;
        record.theme_set = true;
        repo.save(&record).await.unwrap();

        let loaded = repo.get(7).await.unwrap().unwrap();
        assert_eq!(loaded, record);

        let raw: (i64, i64) =
            sqlx::query_as("SELECT stage_id, batch_id FROM conversations WHERE chat_id = 7")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(raw, (2, 5));
    }

    #[tokio::test]
    async fn test_restart_clears_history() {
        let (_dir, db) = setup().await;
        let repo = db.conversations();

        let mut record = repo.get_or_create(9).await.unwrap();
        record.started = true;
        record.concluded = true;
        repo.save(&record).await.unwrap();
        db.chatlogs()
            .add_message(9, MessageRole::User, "hello", 0)
            .await
            .unwrap();

        let fresh = repo.restart(9).await.unwrap();

        assert_eq!(fresh, ConversationRecord::new(9));
        assert_eq!(repo.get(9).await.unwrap().unwrap(), fresh);
        assert!(db.chatlogs().messages(9).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_stage_id_is_reported() {
        let (_dir, db) = setup().await;

        sqlx::query("INSERT INTO conversations (chat_id, stage_id, batch_id, updated_at) VALUES (1, -3, 0, 0)")
            .execute(db.pool())
            .await
            .unwrap();

        assert!(db.conversations().get(1).await.is_err());
    }
}
