/// Questionnaire answers persistence
///
/// One row per question of the questionnaire, written once a conversation is
/// concluded and its history has been analyzed. `answer_text` is NULL when the
/// patient gave no answer.
use anyhow::{Context, Result};
use questionnaire::FlatQuestion;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use super::unix_now;

/// A stored answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerRecord {
    pub question_id: i64,
    pub question_text: String,
    pub answer_text: Option<String>,
}

/// Repository for extracted answers
pub struct AnswerRepository {
    pool: SqlitePool,
}

impl AnswerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store one answer per question, replacing earlier answers of the chat
    pub async fn insert_answers(
        &self,
        chat_id: i64,
        questions: &[FlatQuestion],
        answers: &BTreeMap<i64, Option<String>>,
    ) -> Result<()> {
        let now = unix_now()?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM answers WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear previous answers")?;

        for question in questions {
            let answer = answers.get(&question.id).cloned().flatten();
            sqlx::query(
                r#"
                INSERT INTO answers (chat_id, question_id, question_text, answer_text, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(chat_id)
            .bind(question.id)
            .bind(&question.text)
            .bind(answer)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to insert answer")?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Stored answers of a chat, in questionnaire order
    pub async fn answers(&self, chat_id: i64) -> Result<Vec<AnswerRecord>> {
        let rows = sqlx::query(
            "SELECT question_id, question_text, answer_text FROM answers WHERE chat_id = ? ORDER BY id",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load answers")?;

        Ok(rows
            .iter()
            .map(|row| AnswerRecord {
                question_id: row.get("question_id"),
                question_text: row.get("question_text"),
                answer_text: row.get("answer_text"),
            })
            .collect())
    }
}
