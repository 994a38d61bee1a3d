//! Conversation orchestrator
//!
//! Drives one chat through the questionnaire. Each stage of the catalog is
//! compiled into a batch graph and walked with a [`StageTraversal`]; the model
//! talks to the patient and reports progress with tags (see [`signals`]).
//!
//! A conversation goes through four phases:
//!
//! 1. not started: the greeting is sent
//! 2. theme not set: the first batch of the current stage is introduced
//! 3. if-question pending: waiting for `\yes` or `\no`
//! 4. plain batch pending: waiting for `\done`
//!
//! The cursor is persisted after every advance. A failed step leaves the
//! stored cursor untouched, so the chat can be reloaded from the database.

use anyhow::Result;
use questionnaire::{Cursor, StageTraversal};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::db::{ConversationRecord, Database};
use crate::errors::EngineError;
use crate::llm::{LLMProvider, MessageRole};
use crate::prompts;
use crate::stages::{Stage, StageCatalog};

pub mod signals;

/// Shared services a conversation needs
#[derive(Clone)]
pub struct ConversationContext {
    pub db: Arc<Database>,
    pub catalog: Arc<StageCatalog>,
    pub llm: Arc<dyn LLMProvider>,
    /// Log every compiled batch graph
    pub debug: bool,
    pub llm_timeout: Duration,
    /// Pause between per-stage analysis calls
    pub analysis_delay: Duration,
}

impl ConversationContext {
    pub fn new(
        db: Arc<Database>,
        catalog: Arc<StageCatalog>,
        llm: Arc<dyn LLMProvider>,
        config: &Config,
    ) -> Self {
        Self {
            db,
            catalog,
            llm,
            debug: config.core.debug,
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
            analysis_delay: Duration::from_millis(config.llm.analysis_delay_ms),
        }
    }
}

/// What to send back to the patient
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The conversation goes on
    Message(String),
    /// The last stage was just finished
    Finished(String),
    /// The conversation had already been finished before this message
    AlreadyConcluded,
}

/// Snapshot of a conversation for `/status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationStatus {
    pub stage_name: Option<String>,
    pub cursor: Cursor,
    pub started: bool,
    pub concluded: bool,
    pub message_count: i64,
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current status:")?;
        if let Some(name) = &self.stage_name {
            writeln!(f, "Stage: {} ({})", self.cursor.stage_index + 1, name)?;
        }
        match self.cursor.batch_index {
            Some(batch) => writeln!(f, "Batch: {}", batch + 1)?,
            None => writeln!(f, "Batch: not started")?,
        }
        writeln!(f, "Started: {}", if self.started { "yes" } else { "no" })?;
        writeln!(f, "Finished: {}", if self.concluded { "yes" } else { "no" })?;
        write!(f, "Messages: {}", self.message_count)
    }
}

/// One chat's walk through the questionnaire
pub struct ConversationManager {
    chat_id: i64,
    record: ConversationRecord,
    traversal: StageTraversal,
    ctx: ConversationContext,
}

impl ConversationManager {
    /// Load a conversation, resuming the traversal from the stored cursor
    pub async fn load(chat_id: i64, ctx: ConversationContext) -> Result<Self> {
        let record = ctx.db.conversations().get_or_create(chat_id).await?;
        let mut manager = Self {
            chat_id,
            record,
            traversal: StageTraversal::new(),
            ctx,
        };

        if manager.record.theme_set && !manager.record.concluded {
            let cursor = manager.record.cursor;
            manager.load_stage(cursor.stage_index, cursor.batch_index)?;
            debug!(chat_id, ?cursor, "Resumed conversation");
        }

        Ok(manager)
    }

    /// Reset a conversation without loading its stored cursor
    ///
    /// Works when the stored state can no longer be loaded. Returns the
    /// manager and the greeting.
    pub async fn start_over(chat_id: i64, ctx: ConversationContext) -> Result<(Self, Reply)> {
        let record = ctx.db.conversations().restart(chat_id).await?;
        let mut manager = Self {
            chat_id,
            record,
            traversal: StageTraversal::new(),
            ctx,
        };
        info!(chat_id, "Conversation reset");
        let reply = manager.greet(None).await?;
        Ok((manager, reply))
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    pub fn record(&self) -> &ConversationRecord {
        &self.record
    }

    pub fn is_concluded(&self) -> bool {
        self.record.concluded
    }

    /// Handle one message from the patient
    pub async fn handle(&mut self, text: &str) -> Result<Reply> {
        if self.record.concluded {
            return Ok(Reply::AlreadyConcluded);
        }

        if !self.record.started {
            return self.greet(Some(text)).await;
        }

        self.log(MessageRole::User, text).await?;

        if !self.record.theme_set {
            let stage_index = self.record.cursor.stage_index;
            self.load_stage(stage_index, None)?;
            if !self.present_next(false).await? {
                return Ok(Reply::Finished(prompts::final_response()));
            }
            let reply = self.ask_model().await?;
            self.log(MessageRole::Assistant, &reply).await?;
            return Ok(Reply::Message(signals::strip(&reply)));
        }

        let reply = self.ask_model().await?;
        self.log(MessageRole::Assistant, &reply).await?;

        let found = signals::detect(&reply);
        let step = if self.traversal.current_is_conditional() {
            found.branch_answer()
        } else if found.done {
            Some(false)
        } else {
            None
        };

        let Some(affirmative) = step else {
            return Ok(Reply::Message(signals::strip(&reply)));
        };

        debug!(chat_id = self.chat_id, affirmative, "Batch answered");
        if !self.present_next(affirmative).await? {
            return Ok(Reply::Finished(join_replies(
                &signals::strip(&reply),
                &prompts::final_response(),
            )));
        }

        let follow_up = self.ask_model().await?;
        self.log(MessageRole::Assistant, &follow_up).await?;
        Ok(Reply::Message(join_replies(
            &signals::strip(&reply),
            &signals::strip(&follow_up),
        )))
    }

    /// Forget the conversation and greet the patient again
    pub async fn restart(&mut self) -> Result<Reply> {
        info!(chat_id = self.chat_id, "Restarting conversation");
        self.record = self.ctx.db.conversations().restart(self.chat_id).await?;
        self.traversal = StageTraversal::new();
        self.greet(None).await
    }

    pub async fn status(&self) -> Result<ConversationStatus> {
        let message_count = self.ctx.db.chatlogs().count(self.chat_id).await?;
        Ok(ConversationStatus {
            stage_name: self
                .ctx
                .catalog
                .get(self.record.cursor.stage_index)
                .map(|stage| stage.name.clone()),
            cursor: self.record.cursor,
            started: self.record.started,
            concluded: self.record.concluded,
            message_count,
        })
    }

    async fn greet(&mut self, text: Option<&str>) -> Result<Reply> {
        self.log(MessageRole::System, &prompts::initial_system_prompt())
            .await?;
        if let Some(text) = text {
            self.log(MessageRole::User, text).await?;
        }
        let greeting = prompts::initial_response();
        self.log(MessageRole::Assistant, &greeting).await?;

        self.record.started = true;
        self.ctx.db.conversations().save(&self.record).await?;

        info!(chat_id = self.chat_id, "Conversation started");
        Ok(Reply::Message(greeting))
    }

    fn stage(&self, index: usize) -> std::result::Result<&Stage, EngineError> {
        self.ctx
            .catalog
            .get(index)
            .ok_or(EngineError::StageNotFound(index))
    }

    /// Compile a stage and position the traversal on it
    fn load_stage(
        &mut self,
        stage_index: usize,
        batch_index: Option<usize>,
    ) -> std::result::Result<(), EngineError> {
        let stage = self.stage(stage_index)?;
        let questions = stage.question_tree()?;
        let name = stage.name.clone();

        self.traversal.initialize_questions(&questions, batch_index)?;

        if self.ctx.debug {
            info!(
                chat_id = self.chat_id,
                stage = %name,
                "Batch graph of stage {}:\n{}",
                stage_index,
                self.traversal.graph()
            );
        }
        Ok(())
    }

    /// Introduce the next batch to the model
    ///
    /// Moves on to the following stages when the current one is exhausted.
    /// Returns false once the last stage is done, after marking the
    /// conversation concluded.
    async fn present_next(&mut self, affirmative: bool) -> Result<bool> {
        let mut affirmative = affirmative;
        loop {
            if let Some(batch) = self.traversal.advance(affirmative) {
                let stage_index = self.record.cursor.stage_index;
                let stage_name = self.stage(stage_index)?.name.clone();
                let prompt = if batch.is_conditional {
                    prompts::if_question_prompt(&batch.questions.join("\n"), &stage_name)
                } else {
                    prompts::questions_prompt(&batch.questions, &stage_name)
                };

                self.log(MessageRole::System, &prompt).await?;

                self.record.cursor.batch_index = self.traversal.current_batch_index();
                self.record.theme_set = true;
                self.ctx.db.conversations().save(&self.record).await?;

                debug!(chat_id = self.chat_id, cursor = ?self.record.cursor, "Presented batch");
                return Ok(true);
            }

            let next = self.record.cursor.stage_index + 1;
            if next >= self.ctx.catalog.len() {
                self.record.concluded = true;
                self.ctx.db.conversations().save(&self.record).await?;
                info!(chat_id = self.chat_id, "Questionnaire finished");
                return Ok(false);
            }

            self.load_stage(next, None)?;
            self.record.cursor = Cursor::start(next);
            info!(chat_id = self.chat_id, stage = next, "Moving to next stage");
            affirmative = false;
        }
    }

    /// Ask the model for the next line, given the whole chat history
    async fn ask_model(&self) -> Result<String> {
        let history = self.ctx.db.chatlogs().messages(self.chat_id).await?;

        debug!(
            chat_id = self.chat_id,
            provider = self.ctx.llm.name(),
            messages = history.len(),
            "Calling model"
        );

        match tokio::time::timeout(self.ctx.llm_timeout, self.ctx.llm.generate(&history)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(EngineError::from(e).into()),
            Err(_) => Err(EngineError::LLMTimeout.into()),
        }
    }

    async fn log(&self, role: MessageRole, text: &str) -> Result<()> {
        self.ctx
            .db
            .chatlogs()
            .add_message(self.chat_id, role, text, self.record.cursor.stage_index)
            .await
    }
}

fn join_replies(first: &str, second: &str) -> String {
    [first, second]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n\n")
}
