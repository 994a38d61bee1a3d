//! LLM Provider Abstraction Layer
//!
//! The conversation orchestrator talks to the model through the [`LLMProvider`]
//! trait: it hands over the whole chat history and gets the next doctor line
//! back as plain text. Two providers exist:
//!
//! - [`mistral::MistralProvider`]: a chat-completions HTTP API
//! - [`console::ConsoleProvider`]: an operator typing replies in a terminal

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::{LLMConfig, LLM_API_KEY_ENV};
use crate::errors::EngineError;

pub mod console;
pub mod mistral;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<LLMError> for EngineError {
    fn from(err: LLMError) -> Self {
        EngineError::LLMProvider(err.to_string())
    }
}

/// Message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The patient
    User,

    /// The doctor (model)
    Assistant,

    /// Instructions visible only to the model
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(format!("unknown message role '{}'", other)),
        }
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "mistral", "console")
    fn name(&self) -> &str;

    /// Generate the next assistant message
    ///
    /// # Arguments
    /// * `messages` - Conversation history including system prompts
    async fn generate(&self, messages: &[Message]) -> Result<String>;

    /// Check if the provider is currently healthy and available
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

/// Create the provider selected in the config
pub fn create_provider(config: &LLMConfig) -> std::result::Result<Arc<dyn LLMProvider>, EngineError> {
    match config.provider.as_str() {
        "mistral" => {
            let api_key = std::env::var(LLM_API_KEY_ENV).map_err(|_| {
                EngineError::Config(format!("{} is not set", LLM_API_KEY_ENV))
            })?;
            Ok(Arc::new(mistral::MistralProvider::new(
                &config.base_url,
                &config.model,
                api_key,
            )))
        }
        "console" => Ok(Arc::new(console::ConsoleProvider::new())),
        other => Err(EngineError::Config(format!("Unknown LLM provider '{}'", other))),
    }
}
