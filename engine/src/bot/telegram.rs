//! Telegram Bot Integration
//!
//! Long-polls the Bot API for updates and hands each patient message to that
//! chat's [`ConversationManager`]. Every chat gets a queue drained by its own
//! worker task, so one chat's messages are handled one at a time in arrival
//! order while different chats run concurrently. A worker that stays idle
//! for `session_idle_secs` exits and drops its conversation.

use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::analyzer::analyze_answers;
use crate::config::TelegramConfig;
use crate::conversation::{ConversationContext, ConversationManager, Reply};
use crate::errors::{EngineError, ErrorExt};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram rejects longer messages
const MAX_MESSAGE_CHARS: usize = 4000;

const HELP_TEXT: &str = "Follow-Up Bot.\n\n\
     Talk to the assistant to fill in the follow-up questionnaire.\n\n\
     Commands:\n\
     /restart - Start the conversation over\n\
     /status  - Show the conversation status\n\
     /help    - Show this help";

const CONCLUDED_TEXT: &str = "The conversation is finished. Send /restart to start a new one.";

const FALLBACK_HINT: &str = "Something went wrong. Please try again later";

/// A chat's conversation, loaded on first use
///
/// `None` means the state has to be (re)loaded from the database.
type Session = Option<ConversationManager>;

/// Pending messages of one chat
type ChatQueue = mpsc::UnboundedSender<Message>;

#[derive(Clone)]
pub struct TelegramBot {
    token: String,
    api_base: String,
    allowed_users: Vec<i64>,
    poll_timeout_secs: u64,
    session_idle: Duration,
    client: Client,
    ctx: ConversationContext,
    queues: Arc<Mutex<HashMap<i64, ChatQueue>>>,
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot")
            .field("api_base", &self.api_base)
            .field("allowed_users", &self.allowed_users)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("session_idle", &self.session_idle)
            .finish()
    }
}

#[derive(Deserialize, Debug)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Deserialize, Debug)]
struct Message {
    chat: Chat,
    text: Option<String>,
    from: Option<User>,
}

#[derive(Deserialize, Debug)]
struct Chat {
    id: i64,
}

#[derive(Deserialize, Debug)]
struct User {
    id: i64,
}

#[derive(Deserialize, Debug)]
struct GetUpdatesResponse {
    ok: bool,
    result: Option<Vec<Update>>,
}

impl TelegramBot {
    pub fn new(token: String, config: &TelegramConfig, ctx: ConversationContext) -> Self {
        Self {
            token,
            api_base: DEFAULT_API_BASE.to_string(),
            allowed_users: config.allowed_users.clone(),
            poll_timeout_secs: config.poll_timeout_secs,
            session_idle: Duration::from_secs(config.session_idle_secs),
            client: Client::builder()
                .timeout(Duration::from_secs(config.poll_timeout_secs + 30))
                .build()
                .unwrap_or_default(),
            ctx,
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Talk to another Bot API server
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Start the long-polling loop
    ///
    /// This will block the current task. Should be spawned in a background tokio::task.
    pub async fn start_polling(&self) -> Result<()> {
        info!("Starting Telegram bot long-polling loop...");
        let mut offset = 0;

        loop {
            match self.get_updates(offset).await {
                Ok(updates) => {
                    for update in updates {
                        offset = update.update_id + 1;
                        if let Some(msg) = update.message {
                            self.dispatch(msg).await;
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to fetch Telegram updates: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    /// Queue a message behind the chat's earlier ones
    async fn dispatch(&self, msg: Message) {
        let chat_id = msg.chat.id;
        let mut queues = self.queues.lock().await;

        let msg = match queues.get(&chat_id) {
            Some(queue) => match queue.send(msg) {
                Ok(()) => return,
                // Worker is gone, start a new one
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };

        let (queue, rx) = mpsc::unbounded_channel();
        if queue.send(msg).is_err() {
            return;
        }
        queues.insert(chat_id, queue);

        debug!(chat_id, "Starting chat worker");
        tokio::spawn(self.clone().run_chat(chat_id, rx));
    }

    /// Handle one chat's messages in order until it goes idle
    async fn run_chat(self, chat_id: i64, mut rx: mpsc::UnboundedReceiver<Message>) {
        let mut session: Session = None;

        loop {
            let msg = match tokio::time::timeout(self.session_idle, rx.recv()).await {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(_) => {
                    // dispatch() sends under the same lock, so nothing slips in between
                    let mut queues = self.queues.lock().await;
                    match rx.try_recv() {
                        Ok(msg) => msg,
                        Err(_) => {
                            queues.remove(&chat_id);
                            break;
                        }
                    }
                }
            };
            self.handle_message(&mut session, msg).await;
        }

        debug!(chat_id, "Chat worker stopped");
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let response = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[("offset", offset), ("timeout", self.poll_timeout_secs as i64)])
            .send()
            .await?
            .json::<GetUpdatesResponse>()
            .await?;

        if !response.ok {
            return Err(EngineError::Telegram("getUpdates returned ok=false".to_string()).into());
        }

        Ok(response.result.unwrap_or_default())
    }

    async fn handle_message(&self, session: &mut Session, msg: Message) {
        let chat_id = msg.chat.id;

        let user_id = match msg.from.as_ref() {
            Some(u) => u.id,
            None => {
                warn!("Message with no user info - ignoring");
                return;
            }
        };

        if !self.allowed_users.contains(&user_id) && !self.allowed_users.is_empty() {
            warn!("Unauthorized user {} attempted to use the bot", user_id);
            let _ = self
                .send_message(chat_id, "Unauthorized. Access denied.")
                .await;
            return;
        }

        let Some(text) = msg.text else {
            debug!(chat_id, "Ignoring message without text");
            return;
        };

        info!(chat_id, user_id, "Received message");

        let reply = if text.starts_with('/') {
            self.handle_command(session, chat_id, &text).await
        } else {
            self.handle_text(session, chat_id, &text).await
        };

        if reply.is_empty() {
            return;
        }
        if let Err(e) = self.send_message(chat_id, &reply).await {
            error!("Failed to send reply to {}: {}", chat_id, e);
        }
    }

    /// Pass a patient message to the chat's conversation
    async fn handle_text(&self, session: &mut Session, chat_id: i64, text: &str) -> String {
        let result = match self.loaded(chat_id, session).await {
            Ok(manager) => manager.handle(text).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(Reply::Message(reply)) => reply,
            Ok(Reply::Finished(reply)) => {
                *session = None;
                self.spawn_analysis(chat_id);
                reply
            }
            Ok(Reply::AlreadyConcluded) => {
                *session = None;
                CONCLUDED_TEXT.to_string()
            }
            Err(e) => {
                error!(chat_id, "Failed to handle message: {:#}", e);
                // Reload from the database next time
                *session = None;
                user_hint(&e).to_string()
            }
        }
    }

    /// Handle built-in bot commands
    async fn handle_command(&self, session: &mut Session, chat_id: i64, cmd: &str) -> String {
        match cmd.split_whitespace().next().unwrap_or("") {
            "/start" | "/help" => HELP_TEXT.to_string(),
            "/restart" => self.restart(session, chat_id).await,
            "/status" => self.status(session, chat_id).await,
            _ => format!("Unknown command: {}", cmd),
        }
    }

    async fn restart(&self, session: &mut Session, chat_id: i64) -> String {
        match ConversationManager::start_over(chat_id, self.ctx.clone()).await {
            Ok((manager, Reply::Message(greeting))) => {
                *session = Some(manager);
                greeting
            }
            Ok((manager, _)) => {
                *session = Some(manager);
                String::new()
            }
            Err(e) => {
                error!(chat_id, "Failed to restart conversation: {:#}", e);
                *session = None;
                user_hint(&e).to_string()
            }
        }
    }

    async fn status(&self, session: &mut Session, chat_id: i64) -> String {
        let result = match self.loaded(chat_id, session).await {
            Ok(manager) => manager.status().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(status) if !status.started => "The conversation has not started yet.".to_string(),
            Ok(status) => status.to_string(),
            Err(e) => {
                error!(chat_id, "Failed to read conversation status: {:#}", e);
                *session = None;
                user_hint(&e).to_string()
            }
        }
    }

    /// The chat's conversation, loading it from the database if needed
    async fn loaded<'a>(
        &self,
        chat_id: i64,
        session: &'a mut Session,
    ) -> Result<&'a mut ConversationManager> {
        if session.is_none() {
            *session = Some(ConversationManager::load(chat_id, self.ctx.clone()).await?);
        }
        session
            .as_mut()
            .ok_or_else(|| EngineError::Database("conversation not loaded".to_string()).into())
    }

    fn spawn_analysis(&self, chat_id: i64) {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = analyze_answers(chat_id, &ctx).await {
                error!(chat_id, "Answers analysis failed: {:#}", e);
            }
        });
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        #[derive(Serialize)]
        struct SendMsgReq<'a> {
            chat_id: i64,
            text: &'a str,
        }

        let text = truncate(text);
        let req = SendMsgReq {
            chat_id,
            text: &text,
        };

        self.client
            .post(self.method_url("sendMessage"))
            .json(&req)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| EngineError::Telegram(e.without_url().to_string()))?;
        Ok(())
    }
}

/// What to tell the patient about a failed step
fn user_hint(error: &anyhow::Error) -> &str {
    error
        .downcast_ref::<EngineError>()
        .map(|e| e.user_hint())
        .unwrap_or(FALLBACK_HINT)
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
    format!("{}...\n\n(truncated)", head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::tests::{context, ScriptedProvider};
    use crate::llm::MessageRole;
    use crate::prompts;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn bot_with(
        dir: &TempDir,
        server: &MockServer,
        replies: &[&str],
        config: TelegramConfig,
    ) -> TelegramBot {
        Mock::given(method("POST"))
            .and(path("/bottest_token/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(server)
            .await;

        let ctx = context(dir, Arc::new(ScriptedProvider::new(replies))).await;
        TelegramBot::new("test_token".to_string(), &config, ctx).with_api_base(server.uri())
    }

    async fn bot(dir: &TempDir, server: &MockServer, replies: &[&str], allowed: Vec<i64>) -> TelegramBot {
        let config = TelegramConfig {
            allowed_users: allowed,
            ..TelegramConfig::default()
        };
        bot_with(dir, server, replies, config).await
    }

    fn message(user_id: i64, text: &str) -> Message {
        Message {
            chat: Chat { id: user_id },
            text: Some(text.to_string()),
            from: Some(User { id: user_id }),
        }
    }

    async fn sent_texts(server: &MockServer) -> Vec<String> {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|req| req.url.path().ends_with("/sendMessage"))
            .map(|req| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                body["text"].as_str().unwrap().to_string()
            })
            .collect()
    }

    async fn user_messages(bot: &TelegramBot, chat_id: i64) -> Vec<String> {
        bot.ctx
            .db
            .chatlogs()
            .messages(chat_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.role == MessageRole::User)
            .map(|m| m.content)
            .collect()
    }

    #[tokio::test]
    async fn test_conversation_over_telegram() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        let bot = bot(&dir, &server, &["How did you sleep?"], vec![]).await;
        let mut session = None;

        bot.handle_message(&mut session, message(10, "hello")).await;
        bot.handle_message(&mut session, message(10, "fine")).await;
        bot.handle_message(&mut session, message(10, "/status")).await;

        let sent = sent_texts(&server).await;
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], prompts::initial_response());
        assert_eq!(sent[1], "How did you sleep?");
        assert!(sent[2].contains("Stage: 1 (Wellbeing)"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_polled_messages_keep_arrival_order() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        let replies = vec!["Tell me more."; 40];
        let bot = bot(&dir, &server, &replies, vec![]).await;

        let updates: Vec<serde_json::Value> = (0..40)
            .map(|i| {
                json!({
                    "update_id": i + 1,
                    "message": {
                        "chat": {"id": 77},
                        "from": {"id": 77},
                        "text": format!("m{}", i)
                    }
                })
            })
            .collect();
        Mock::given(method("GET"))
            .and(path("/bottest_token/getUpdates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": updates})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bottest_token/getUpdates"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "result": []}))
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&server)
            .await;

        let poller = {
            let bot = bot.clone();
            tokio::spawn(async move { bot.start_polling().await })
        };

        let mut received = Vec::new();
        for _ in 0..100 {
            received = user_messages(&bot, 77).await;
            if received.len() == 40 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        poller.abort();

        let expected: Vec<String> = (0..40).map(|i| format!("m{}", i)).collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_idle_worker_is_dropped() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        let config = TelegramConfig {
            session_idle_secs: 1,
            ..TelegramConfig::default()
        };
        let bot = bot_with(&dir, &server, &[], config).await;

        bot.dispatch(message(21, "hello")).await;
        assert!(bot.queues.lock().await.contains_key(&21));

        for _ in 0..50 {
            if bot.queues.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(bot.queues.lock().await.is_empty());

        // A later message starts a fresh worker that reloads the chat
        bot.dispatch(message(21, "/status")).await;
        for _ in 0..50 {
            if sent_texts(&server).await.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let sent = sent_texts(&server).await;
        assert_eq!(sent[0], prompts::initial_response());
        assert!(sent[1].contains("Batch: not started"));
    }

    #[tokio::test]
    async fn test_concluded_chat_drops_session() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        let bot = bot(&dir, &server, &[], vec![]).await;

        let mut record = bot.ctx.db.conversations().get_or_create(14).await.unwrap();
        record.started = true;
        record.concluded = true;
        bot.ctx.db.conversations().save(&record).await.unwrap();

        let mut session = None;
        bot.handle_message(&mut session, message(14, "hello?")).await;

        assert_eq!(sent_texts(&server).await, vec![CONCLUDED_TEXT]);
        assert!(session.is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_user_rejected() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        let bot = bot(&dir, &server, &[], vec![111]).await;

        bot.handle_message(&mut None, message(333, "hello")).await;

        assert_eq!(sent_texts(&server).await, vec!["Unauthorized. Access denied."]);
        assert!(bot.ctx.db.conversations().get(333).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_model_error_sends_hint_and_evicts() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        let bot = bot(&dir, &server, &[], vec![]).await;
        let mut session = None;

        bot.handle_message(&mut session, message(12, "hello")).await;
        assert!(session.is_some());
        bot.handle_message(&mut session, message(12, "fine")).await;

        let sent = sent_texts(&server).await;
        assert_eq!(
            sent[1],
            EngineError::LLMProvider(String::new()).user_hint()
        );
        assert!(session.is_none());
    }

    #[tokio::test]
    async fn test_restart_and_help_commands() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        let bot = bot(&dir, &server, &[], vec![]).await;
        let mut session = None;

        bot.handle_message(&mut session, message(13, "/help")).await;
        bot.handle_message(&mut session, message(13, "/status")).await;
        bot.handle_message(&mut session, message(13, "/restart")).await;
        bot.handle_message(&mut session, message(13, "/unknown")).await;

        let sent = sent_texts(&server).await;
        assert_eq!(sent[0], HELP_TEXT);
        assert_eq!(sent[1], "The conversation has not started yet.");
        assert_eq!(sent[2], prompts::initial_response());
        assert_eq!(sent[3], "Unknown command: /unknown");
    }

    #[test]
    fn test_truncate_long_messages() {
        let long = "é".repeat(MAX_MESSAGE_CHARS + 10);
        let truncated = truncate(&long);
        assert!(truncated.ends_with("(truncated)"));
        assert_eq!(truncate("short"), "short");
    }
}
