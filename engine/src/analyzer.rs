//! Answers extraction
//!
//! Once a conversation is finished, each stage's part of the chat history is
//! handed back to the model together with the flattened question list, and
//! the model writes the patient's answers as `id: answer` lines. The parsed
//! answers are stored with one row per question.

use anyhow::{Context, Result};
use questionnaire::{flatten, FlatQuestion};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::conversation::ConversationContext;
use crate::errors::EngineError;
use crate::llm::Message;
use crate::prompts;

/// Parse `id: answer` lines
///
/// `None` (any case) means the question was not answered. Lines without a
/// colon or with a non-integer id are skipped.
pub fn parse_answers(text: &str) -> BTreeMap<i64, Option<String>> {
    let mut answers = BTreeMap::new();

    for line in text.lines() {
        let Some((id, answer)) = line.split_once(':') else {
            continue;
        };
        let Ok(id) = id.trim().parse::<i64>() else {
            debug!("Skipping answer line with invalid id: {}", line);
            continue;
        };

        let answer = answer.trim();
        let answer = if answer.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(answer.to_string())
        };
        answers.insert(id, answer);
    }

    answers
}

/// Extract and store the answers of a finished conversation
///
/// Returns the raw model output of every stage, joined by newlines.
pub async fn analyze_answers(chat_id: i64, ctx: &ConversationContext) -> Result<String> {
    info!(chat_id, "Analyzing answers");

    let mut questions: Vec<FlatQuestion> = Vec::new();
    let mut answers = BTreeMap::new();
    let mut analysis = Vec::new();

    for (index, stage) in ctx.catalog.iter().enumerate() {
        let stage_questions = flatten(&stage.question_tree().map_err(EngineError::from)?);
        if stage_questions.is_empty() {
            continue;
        }

        if !analysis.is_empty() && !ctx.analysis_delay.is_zero() {
            tokio::time::sleep(ctx.analysis_delay).await;
        }

        let mut messages = ctx.db.chatlogs().stage_messages(chat_id, index).await?;
        messages.push(Message::user(prompts::answers_list_prompt(&stage_questions)));

        let output = match tokio::time::timeout(ctx.llm_timeout, ctx.llm.generate(&messages)).await {
            Ok(result) => result.map_err(EngineError::from)?,
            Err(_) => return Err(EngineError::LLMTimeout.into()),
        };
        debug!(chat_id, stage = %stage.name, "Answers analysis:\n{}", output);

        let parsed = parse_answers(&output);
        if parsed.is_empty() {
            warn!(chat_id, stage = %stage.name, "Model returned no parsable answers");
        }

        answers.extend(parsed);
        questions.extend(stage_questions);
        analysis.push(output);
    }

    ctx.db
        .answers()
        .insert_answers(chat_id, &questions, &answers)
        .await
        .context("Failed to store extracted answers")?;

    info!(chat_id, questions = questions.len(), "Stored extracted answers");
    Ok(analysis.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::tests::{context, ScriptedProvider};
    use crate::llm::MessageRole;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_parse_answers() {
        let parsed = parse_answers("1: badly\n2: None\n3:  left knee: sharp \n4: none");

        assert_eq!(parsed.get(&1), Some(&Some("badly".to_string())));
        assert_eq!(parsed.get(&2), Some(&None));
        assert_eq!(parsed.get(&3), Some(&Some("left knee: sharp".to_string())));
        assert_eq!(parsed.get(&4), Some(&None));
    }

    #[test]
    fn test_parse_answers_skips_noise() {
        let parsed = parse_answers("Here are the answers:\nno colon here\nfive: x\n\n 7 : fine");

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.get(&7), Some(&Some("fine".to_string())));
    }

    #[tokio::test]
    async fn test_analyze_stores_one_row_per_question() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedProvider::new(&[
            "1: badly\n2: yes\n3: knee\n4: None",
            "5: every day",
        ]));
        let ctx = context(&dir, provider.clone()).await;

        ctx.db
            .chatlogs()
            .add_message(11, MessageRole::User, "I slept badly", 0)
            .await
            .unwrap();
        ctx.db
            .chatlogs()
            .add_message(11, MessageRole::User, "I take them every day", 1)
            .await
            .unwrap();

        let analysis = analyze_answers(11, &ctx).await.unwrap();
        assert!(analysis.contains("5: every day"));

        let stored = ctx.db.answers().answers(11).await.unwrap();
        let ids: Vec<i64> = stored.iter().map(|a| a.question_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(stored[2].answer_text.as_deref(), Some("knee"));
        assert_eq!(stored[3].answer_text, None);

        // Each stage is analyzed on its own history
        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0][0], Message::user("I slept badly"));
        assert_eq!(seen[1][0], Message::user("I take them every day"));
        assert!(seen[1][1].content.contains("5: Taking your pills?"));
    }
}
