// Follow-Up questionnaire bot
// Main entry point for the followup binary

use clap::Parser;
use followup_engine::cli::{Cli, Command};
use followup_engine::config::Config;
use followup_engine::handlers::{
    handle_answers, handle_chat, handle_doctor, handle_inspect, handle_reset, handle_serve,
    OutputFormat,
};
use followup_engine::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config level; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry(log_level);

    tracing::info!("Follow-Up v{}", env!("CARGO_PKG_VERSION"));

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Handle commands
    match cli.command {
        Command::Serve => {
            tracing::info!("Starting Telegram bot...");
            handle_serve(&config).await
        }

        Command::Chat { chat_id } => {
            tracing::info!("Starting terminal chat {}", chat_id);
            handle_chat(chat_id, &config).await
        }

        Command::Inspect { stage } => handle_inspect(stage, &config, format).await,

        Command::Reset { chat_id } => {
            tracing::info!("Resetting conversation {}", chat_id);
            handle_reset(chat_id, &config, format).await
        }

        Command::Answers { chat_id } => handle_answers(chat_id, &config, format).await,

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }
    }
}
