//! Error types and handling
//!
//! This module provides the error type used at the engine's boundaries.
//! Every error implements [`ErrorExt`], which gives a hint that is safe to send
//! to a chat user and says whether the failed step may be retried.
//!
//! # Security
//!
//! Hints never contain tokens, API keys, file paths or raw model output.
//! The full error goes to the log only.

use questionnaire::QuestionnaireError;
use thiserror::Error;

/// Extensions for engine errors
pub trait ErrorExt {
    /// Returns a hint that can be shown to the person in the chat
    fn user_hint(&self) -> &str;

    /// Returns whether retrying the same step may succeed
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use followup_engine::errors::{EngineError, ErrorExt};
///
/// let error = EngineError::LLMTimeout;
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::StageNotFound(7);
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    #[error("LLM call timed out")]
    LLMTimeout,

    // Questionnaire errors
    #[error("Stage {0} not found in the stage catalog")]
    StageNotFound(usize),

    #[error(transparent)]
    Questionnaire(#[from] QuestionnaireError),

    // Transport errors
    #[error("Telegram error: {0}")]
    Telegram(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "The bot is misconfigured. Please contact the operator",
            Self::Database(_) => "Could not save the conversation. Please try again",
            Self::LLMProvider(_) => "The assistant is unavailable right now. Please try again later",
            Self::LLMTimeout => "The assistant took too long to respond. Please try again",
            Self::StageNotFound(_) => {
                "The questionnaire has changed. Send /restart to start over"
            }
            Self::Questionnaire(QuestionnaireError::IndexOutOfRange { .. })
            | Self::Questionnaire(QuestionnaireError::InvalidCursor(_)) => {
                "The questionnaire has changed since your last visit. Send /restart to start over"
            }
            Self::Questionnaire(QuestionnaireError::MalformedQuestionSource { .. }) => {
                "The questionnaire could not be loaded. Please contact the operator"
            }
            Self::Telegram(_) => "Message delivery failed",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Persisted state and question source disagree; retrying changes nothing
            Self::Config(_) | Self::StageNotFound(_) | Self::Questionnaire(_) => false,

            _ => true,
        }
    }
}
