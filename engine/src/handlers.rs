//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - serve: Run the Telegram bot
//! - chat: Hold a conversation in the terminal
//! - inspect: Show the compiled batch graphs
//! - reset: Forget a conversation
//! - answers: Show extracted answers
//! - doctor: Validate configuration and check dependencies

use anyhow::{Context, Result};
use questionnaire::{BatchGraph, QuestionnaireError};
use serde_json::json;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

use crate::analyzer::analyze_answers;
use crate::bot::TelegramBot;
use crate::config::{Config, BOT_TOKEN_ENV};
use crate::conversation::{ConversationContext, ConversationManager, Reply};
use crate::db::Database;
use crate::errors::{EngineError, ErrorExt};
use crate::llm::console::{shared_stdin, ConsoleProvider, SharedStdin};
use crate::llm::{create_provider, LLMProvider};
use crate::stages::StageCatalog;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Open the database and the stage catalog
pub async fn open_context(
    config: &Config,
    llm: Arc<dyn LLMProvider>,
) -> Result<ConversationContext> {
    let catalog = StageCatalog::load(&config.questionnaire.stages_file)?;
    let database = Database::new(&config.db_path())
        .await
        .context("Failed to open database")?;

    Ok(ConversationContext::new(
        Arc::new(database),
        Arc::new(catalog),
        llm,
        config,
    ))
}

/// Run the Telegram bot until Ctrl-C
pub async fn handle_serve(config: &Config) -> Result<()> {
    let token = config.telegram_token().ok_or_else(|| {
        EngineError::Config(format!(
            "No bot token. Set {} or telegram.token in the config",
            BOT_TOKEN_ENV
        ))
    })?;

    let llm = create_provider(&config.llm)?;
    let ctx = open_context(config, llm).await?;
    let db = ctx.db.clone();
    let bot = TelegramBot::new(token, &config.telegram, ctx);

    info!("Serving {} stages", config.questionnaire.stages_file.display());

    tokio::select! {
        result = bot.start_polling() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    db.flush_wal().await?;
    Ok(())
}

/// Hold a conversation in the terminal
///
/// Each line read from stdin is a patient message. `/restart` and `/status`
/// work as in the bot; `/quit` or end of input leaves.
pub async fn handle_chat(chat_id: i64, config: &Config) -> Result<()> {
    let stdin = shared_stdin();
    let llm: Arc<dyn LLMProvider> = if config.llm.provider == "console" {
        Arc::new(ConsoleProvider::with_input(stdin.clone()))
    } else {
        create_provider(&config.llm)?
    };

    let ctx = open_context(config, llm).await?;
    let mut manager = ConversationManager::load(chat_id, ctx.clone()).await?;

    println!("Chatting as conversation {}. Type /quit to leave.", chat_id);

    while let Some(line) = read_line(&stdin).await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let result = match text {
            "/quit" => break,
            "/status" => {
                println!("{}", manager.status().await?);
                continue;
            }
            "/restart" => manager.restart().await,
            _ => manager.handle(text).await,
        };

        match result {
            Ok(Reply::Message(reply)) => println!("doctor> {}", reply),
            Ok(Reply::Finished(reply)) => {
                println!("doctor> {}", reply);
                analyze_answers(chat_id, &ctx).await?;
                print_answers(chat_id, &ctx.db, OutputFormat::Text).await?;
            }
            Ok(Reply::AlreadyConcluded) => {
                println!("The conversation is finished. Type /restart to start a new one.");
            }
            Err(e) => {
                warn!("Failed to handle message: {:#}", e);
                let hint = e
                    .downcast_ref::<EngineError>()
                    .map(|e| e.user_hint())
                    .unwrap_or("Something went wrong");
                println!("error> {}", hint);
                manager = ConversationManager::load(chat_id, ctx.clone()).await?;
            }
        }
    }

    Ok(())
}

async fn read_line(stdin: &SharedStdin) -> Result<Option<String>> {
    let mut line = String::new();
    let read = stdin
        .lock()
        .await
        .read_line(&mut line)
        .await
        .context("Failed to read stdin")?;
    Ok((read > 0).then_some(line))
}

/// Compiled batch graph of every stage, or the stage's build error
pub fn stage_graphs(
    catalog: &StageCatalog,
) -> Vec<(String, std::result::Result<BatchGraph, QuestionnaireError>)> {
    catalog
        .iter()
        .map(|stage| {
            let graph = stage
                .question_tree()
                .map(|questions| BatchGraph::compile(&questions));
            (stage.name.clone(), graph)
        })
        .collect()
}

/// Show the compiled batch graphs of the stage catalog
pub async fn handle_inspect(
    stage: Option<usize>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let catalog = StageCatalog::load(&config.questionnaire.stages_file)?;
    let graphs = stage_graphs(&catalog);

    let selected: Vec<(usize, &(String, _))> = match stage {
        Some(number) => {
            let index = number
                .checked_sub(1)
                .filter(|i| *i < graphs.len())
                .ok_or_else(|| EngineError::StageNotFound(number))?;
            vec![(index, &graphs[index])]
        }
        None => graphs.iter().enumerate().collect(),
    };

    match format {
        OutputFormat::Text => {
            for (index, (name, graph)) in selected {
                println!("Stage {}: {}", index + 1, name);
                match graph {
                    Ok(graph) if graph.is_empty() => println!("  (no questions)"),
                    Ok(graph) => {
                        for line in graph.to_string().lines() {
                            println!("  {}", line);
                        }
                    }
                    Err(e) => println!("  error: {}", e),
                }
                println!();
            }
        }
        OutputFormat::Json => {
            let stages: Vec<_> = selected
                .into_iter()
                .map(|(index, (name, graph))| match graph {
                    Ok(graph) => json!({
                        "stage": index + 1,
                        "name": name,
                        "batches": graph,
                    }),
                    Err(e) => json!({
                        "stage": index + 1,
                        "name": name,
                        "error": e.to_string(),
                    }),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json!({ "stages": stages }))?);
        }
    }

    Ok(())
}

/// Forget a conversation, its history and its answers
pub async fn handle_reset(chat_id: i64, config: &Config, format: OutputFormat) -> Result<()> {
    let database = Database::new(&config.db_path())
        .await
        .context("Failed to open database")?;

    database.conversations().restart(chat_id).await?;
    info!(chat_id, "Conversation reset from the command line");

    match format {
        OutputFormat::Text => println!("Conversation {} reset.", chat_id),
        OutputFormat::Json => println!("{}", json!({ "chat_id": chat_id, "reset": true })),
    }

    database.close().await
}

/// Show the extracted answers of a conversation
pub async fn handle_answers(chat_id: i64, config: &Config, format: OutputFormat) -> Result<()> {
    let database = Database::new(&config.db_path())
        .await
        .context("Failed to open database")?;

    print_answers(chat_id, &database, format).await?;
    database.close().await
}

async fn print_answers(chat_id: i64, database: &Database, format: OutputFormat) -> Result<()> {
    let answers = database
        .answers()
        .answers(chat_id)
        .await
        .context("Failed to fetch answers")?;

    match format {
        OutputFormat::Text => {
            if answers.is_empty() {
                println!("No answers for conversation {}", chat_id);
                return Ok(());
            }

            println!("Answers of conversation {}:", chat_id);
            println!();
            for answer in &answers {
                println!("{}. {}", answer.question_id, answer.question_text);
                println!("   {}", answer.answer_text.as_deref().unwrap_or("(no answer)"));
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "chat_id": chat_id,
                "answers": answers,
                "count": answers.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Validate configuration and check dependencies
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks: Vec<(&str, String)> = Vec::new();

    // Config is already validated when loaded
    checks.push(("Configuration", "Valid".to_string()));

    match StageCatalog::load(&config.questionnaire.stages_file) {
        Ok(catalog) => {
            checks.push(("Stage catalog", format!("{} stages", catalog.len())));
            if catalog.is_empty() {
                issues.push("The stage catalog has no stages".to_string());
            }
            for (index, (name, graph)) in stage_graphs(&catalog).into_iter().enumerate() {
                if let Err(e) = graph {
                    issues.push(format!("Stage {} ({}): {}", index + 1, name, e));
                }
            }
        }
        Err(e) => {
            checks.push(("Stage catalog", "Failed".to_string()));
            issues.push(format!("{:#}", e));
        }
    }

    match Database::new(&config.db_path()).await {
        Ok(database) => {
            checks.push(("Database", "OK".to_string()));
            database.close().await?;
        }
        Err(e) => {
            checks.push(("Database", "Failed".to_string()));
            issues.push(format!("Cannot open database: {:#}", e));
        }
    }

    if config.telegram_token().is_some() {
        checks.push(("Bot token", "Configured".to_string()));
    } else {
        checks.push(("Bot token", "Not configured".to_string()));
        issues.push(format!("Set {} to run the bot", BOT_TOKEN_ENV));
    }

    match create_provider(&config.llm) {
        Ok(provider) => {
            if provider.check_health().await {
                checks.push(("LLM provider", format!("{} available", provider.name())));
            } else {
                checks.push(("LLM provider", format!("{} unreachable", provider.name())));
                issues.push(format!("Cannot reach {}", config.llm.base_url));
            }
        }
        Err(e) => {
            checks.push(("LLM provider", "Not configured".to_string()));
            issues.push(e.to_string());
        }
    }

    match format {
        OutputFormat::Text => {
            println!("Follow-Up Doctor");
            println!();
            for (name, status) in &checks {
                println!("  {:<14} {}", name, status);
            }
            println!();
            if issues.is_empty() {
                println!("No issues found.");
            } else {
                println!("Issues:");
                for issue in &issues {
                    println!("  - {}", issue);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "checks": checks
                    .iter()
                    .map(|(name, status)| json!({ "name": name, "status": status }))
                    .collect::<Vec<_>>(),
                "issues": issues,
                "healthy": issues.is_empty(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
