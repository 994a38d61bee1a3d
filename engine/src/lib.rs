//! Follow-Up Engine Library
//!
//! Everything around the questionnaire core: configuration, persistence, the
//! model client, the conversation orchestrator and the Telegram bot.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Engine error types
pub mod errors;

/// Stage catalog module
pub mod stages;

/// Prompt construction module
pub mod prompts;

/// Database persistence module
pub mod db;

/// LLM provider abstraction layer
pub mod llm;

/// Conversation orchestrator module
pub mod conversation;

/// Answers extraction module
pub mod analyzer;

/// Telegram bot module
pub mod bot;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
