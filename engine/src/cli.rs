//! CLI interface for Follow-Up
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags of the `followup` binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Follow-Up questionnaire bot
///
/// Walks patients through a staged follow-up questionnaire in a chat, with a
/// language model asking the questions.
#[derive(Parser, Debug)]
#[command(name = "followup")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the Telegram bot
    Serve,

    /// Hold a conversation in the terminal
    Chat {
        /// Conversation to use (default: 0)
        #[arg(long, default_value = "0")]
        chat_id: i64,
    },

    /// Show the compiled batch graphs of the stage catalog
    Inspect {
        /// Only show this stage (1-based)
        #[arg(short, long)]
        stage: Option<usize>,
    },

    /// Forget a conversation, its history and its answers
    Reset {
        /// Chat ID
        chat_id: i64,
    },

    /// Show the extracted answers of a conversation
    Answers {
        /// Chat ID
        chat_id: i64,
    },

    /// Check configuration, stage catalog and model provider
    Doctor,
}
