//! End-to-end conversation tests
//!
//! Runs whole questionnaires through the orchestrator with a scripted model,
//! reopening the database between messages the way a restarted bot would.

use async_trait::async_trait;
use followup_engine::analyzer::analyze_answers;
use followup_engine::config::Config;
use followup_engine::conversation::{ConversationContext, ConversationManager, Reply};
use followup_engine::db::Database;
use followup_engine::llm::{LLMError, LLMProvider, Message, MessageRole};
use followup_engine::prompts;
use followup_engine::stages::StageCatalog;
use serde_json::json;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedModel {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        })
    }
}

#[async_trait]
impl LLMProvider for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _messages: &[Message]) -> Result<String, LLMError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LLMError::ProviderUnavailable("script exhausted".to_string()))
    }
}

fn catalog() -> StageCatalog {
    StageCatalog::from_json(
        &json!([
            {
                "name": "Symptoms",
                "questions": [
                    {"id": 1, "text": "Do you have a fever?", "if": true, "questions": [
                        {"id": 2, "text": "How high?"},
                        {"id": 3, "text": "Since when?"}
                    ]},
                    {"id": 4, "text": "Do you cough?", "if": true, "questions": [
                        {"id": 5, "text": "Dry or wet?"}
                    ]}
                ]
            },
            { "name": "Empty", "questions": [] },
            {
                "name": "Closing",
                "questions": [{"id": 6, "text": "Anything else?"}]
            }
        ])
        .to_string(),
    )
    .unwrap()
}

async fn open(dir: &Path, model: Arc<ScriptedModel>) -> ConversationContext {
    let db = Database::new(&dir.join("followup.db")).await.unwrap();
    let mut config = Config::default_config();
    config.core.debug = true;
    config.llm.analysis_delay_ms = 0;
    ConversationContext::new(Arc::new(db), Arc::new(catalog()), model, &config)
}

/// Send one message through a freshly loaded manager
async fn say(ctx: &ConversationContext, chat_id: i64, text: &str) -> Reply {
    let mut manager = ConversationManager::load(chat_id, ctx.clone()).await.unwrap();
    manager.handle(text).await.unwrap()
}

#[tokio::test]
async fn test_questionnaire_survives_reloads() {
    let dir = TempDir::new().unwrap();
    let model = ScriptedModel::new(&[
        // stage 1: fever? yes -> children -> cough? no
        "Do you have a fever?",
        "\\yes",
        "How high is it, and since when?",
        "\\done",
        "Do you cough at all?",
        "\\no",
        // the empty stage is skipped
        "Anything else you want to tell me?",
        "Thank you! \\done",
    ]);
    let ctx = open(dir.path(), model.clone()).await;
    let chat = 100;

    assert_eq!(say(&ctx, chat, "hi").await, Reply::Message(prompts::initial_response()));
    assert_eq!(
        say(&ctx, chat, "ok").await,
        Reply::Message("Do you have a fever?".to_string())
    );
    assert_eq!(
        say(&ctx, chat, "yes").await,
        Reply::Message("How high is it, and since when?".to_string())
    );
    assert_eq!(
        say(&ctx, chat, "39, since Monday").await,
        Reply::Message("Do you cough at all?".to_string())
    );

    // Reopen the database as a restarted process would
    ctx.db.flush_wal().await.unwrap();
    let ctx = open(dir.path(), model).await;

    assert_eq!(
        say(&ctx, chat, "no").await,
        Reply::Message("Anything else you want to tell me?".to_string())
    );

    let record = ctx.db.conversations().get(chat).await.unwrap().unwrap();
    assert_eq!(record.cursor.stage_index, 2);
    assert_eq!(record.cursor.batch_index, Some(0));

    assert_eq!(
        say(&ctx, chat, "no, that's all").await,
        Reply::Finished(format!("Thank you!\n\n{}", prompts::final_response()))
    );
    assert_eq!(say(&ctx, chat, "hello?").await, Reply::AlreadyConcluded);

    // Batch notes were logged under the stage they belong to
    let closing = ctx.db.chatlogs().stage_messages(chat, 2).await.unwrap();
    assert!(closing
        .iter()
        .any(|m| m.role == MessageRole::System && m.content.contains("Anything else?")));
    assert!(ctx.db.chatlogs().stage_messages(chat, 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_answers_are_extracted_after_the_end() {
    let dir = TempDir::new().unwrap();
    let model = ScriptedModel::new(&[
        "Do you have a fever?",
        "\\no",
        "Do you cough?",
        "\\no",
        "Anything else?",
        "\\done",
        // analysis, one call per stage with questions
        "1: no\n2: None\n3: None\n4: no\n5: None",
        "6: None",
    ]);
    let ctx = open(dir.path(), model).await;
    let chat = 200;

    say(&ctx, chat, "hi").await;
    say(&ctx, chat, "ok").await;
    say(&ctx, chat, "no fever").await;
    say(&ctx, chat, "no cough").await;
    let reply = say(&ctx, chat, "nothing").await;
    assert!(matches!(reply, Reply::Finished(_)));

    analyze_answers(chat, &ctx).await.unwrap();

    let answers = ctx.db.answers().answers(chat).await.unwrap();
    let ids: Vec<i64> = answers.iter().map(|a| a.question_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(answers[0].answer_text.as_deref(), Some("no"));
    assert!(answers[1..3].iter().all(|a| a.answer_text.is_none()));
    assert_eq!(answers[5].answer_text, None);
}

#[tokio::test]
async fn test_chats_are_independent() {
    let dir = TempDir::new().unwrap();
    let model = ScriptedModel::new(&["Do you have a fever?"]);
    let ctx = open(dir.path(), model).await;

    say(&ctx, 1, "hi").await;
    say(&ctx, 2, "hi").await;
    say(&ctx, 1, "ok").await;

    let first = ctx.db.conversations().get(1).await.unwrap().unwrap();
    let second = ctx.db.conversations().get(2).await.unwrap().unwrap();
    assert!(first.theme_set);
    assert_eq!(first.cursor.batch_index, Some(0));
    assert!(!second.theme_set);
    assert_eq!(second.cursor.batch_index, None);
}
