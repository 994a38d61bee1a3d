//! Configuration management
//!
//! This module handles loading, validation, and management of the Follow-Up
//! configuration. Configuration is stored in TOML format at
//! ~/.followup/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory, debug dumps
//! - **questionnaire**: Location of the stage catalog
//! - **llm**: Model provider settings
//! - **telegram**: Bot access and polling settings
//!
//! Secrets are not stored in the file: the model API key is read from
//! `MISTRAL_API_KEY` and the bot token from `FOLLOWUP_BOT_TOKEN` (a `token` key
//! in `[telegram]` is accepted as a fallback).
//!
//! # Path Expansion
//!
//! `~` is expanded in every path. A relative `stages_file` is resolved against
//! the directory of the config file it was read from.
//!
//! # Examples
//!
//! ```no_run
//! use followup_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Stages: {:?}", config.questionnaire.stages_file);
//! println!("Model: {}", config.llm.model);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::EngineError;

/// Environment variable holding the Telegram bot token
pub const BOT_TOKEN_ENV: &str = "FOLLOWUP_BOT_TOKEN";

/// Environment variable holding the model API key
pub const LLM_API_KEY_ENV: &str = "MISTRAL_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    pub core: CoreConfig,

    /// Questionnaire source
    pub questionnaire: QuestionnaireConfig,

    /// Model provider configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Telegram bot configuration
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log every compiled batch graph when a stage is loaded
    #[serde(default)]
    pub debug: bool,
}

/// Questionnaire configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionnaireConfig {
    /// JSON stage catalog (supports ~ expansion)
    #[serde(default = "default_stages_file")]
    pub stages_file: PathBuf,
}

/// Model provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Provider (mistral, console)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Base URL of the chat completions API
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Timeout for a single model call (seconds)
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Pause between per-stage calls of the answers analysis (milliseconds)
    #[serde(default = "default_analysis_delay")]
    pub analysis_delay_ms: u64,
    // Note: API key comes from MISTRAL_API_KEY, not from config
}

/// Telegram bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token, used when FOLLOWUP_BOT_TOKEN is unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Users allowed to talk to the bot (empty allows everyone)
    #[serde(default)]
    pub allowed_users: Vec<i64>,

    /// Long-polling timeout for getUpdates (seconds)
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Drop a chat's in-memory session after this long without messages (seconds)
    #[serde(default = "default_session_idle")]
    pub session_idle_secs: u64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.followup")
}

fn default_stages_file() -> PathBuf {
    PathBuf::from("~/.followup/stages.json")
}

fn default_provider() -> String {
    "mistral".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.mistral.ai/v1".to_string()
}

fn default_llm_model() -> String {
    "mistral-large-latest".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_analysis_delay() -> u64 {
    3000
}

fn default_poll_timeout() -> u64 {
    30
}

fn default_session_idle() -> u64 {
    900
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            analysis_delay_ms: default_analysis_delay(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            allowed_users: Vec::new(),
            poll_timeout_secs: default_poll_timeout(),
            session_idle_secs: default_session_idle(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.followup/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written, TOML parsing
    /// fails, or validation fails.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process(path.parent())?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process(path.parent())?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.followup/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".followup").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
                data_dir: default_data_dir(),
                debug: false,
            },
            questionnaire: QuestionnaireConfig {
                stages_file: default_stages_file(),
            },
            llm: LLMConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }

    /// Path of the SQLite database inside the data directory
    pub fn db_path(&self) -> PathBuf {
        self.core.data_dir.join("followup.db")
    }

    /// Bot token from the environment, falling back to the config file
    pub fn telegram_token(&self) -> Option<String> {
        std::env::var(BOT_TOKEN_ENV)
            .ok()
            .filter(|token| !token.is_empty())
            .or_else(|| self.telegram.token.clone())
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates enumerated and numeric fields
    /// - Expands ~ in paths
    /// - Resolves a relative stages file against `base_dir`
    /// - Creates the data directory if it doesn't exist
    pub fn validate_and_process(&mut self, base_dir: Option<&Path>) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["mistral", "console"];
        if !valid_providers.contains(&self.llm.provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid provider '{}'. Must be one of: {}",
                self.llm.provider,
                valid_providers.join(", ")
            )));
        }

        if self.llm.timeout_secs == 0 {
            return Err(EngineError::Config(
                "llm.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.telegram.poll_timeout_secs == 0 {
            return Err(EngineError::Config(
                "telegram.poll_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.telegram.session_idle_secs == 0 {
            return Err(EngineError::Config(
                "telegram.session_idle_secs must be greater than 0".to_string(),
            ));
        }

        self.questionnaire.stages_file = expand_path(&self.questionnaire.stages_file)?;
        if self.questionnaire.stages_file.is_relative() {
            if let Some(base) = base_dir {
                self.questionnaire.stages_file = base.join(&self.questionnaire.stages_file);
            }
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
