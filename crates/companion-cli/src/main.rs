//! CLI entry point for the companion.
//!
//! This binary provides the `companion` command: an interactive chat loop
//! plus maintenance subcommands for memory and provider health.

mod app;
mod config;
mod repl;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use companion_memory::SummaryOutcome;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::config::AppConfig;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// A conversational companion with provider failover and long-term memory.
#[derive(Parser)]
#[command(name = "companion", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, env = "COMPANION_CONFIG", default_value = "companion.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat on stdin, one message per line.
    Chat,

    /// Summarize the current conversation buffer into memory now.
    Summarize,

    /// Show provider health, buffer size and memory count.
    Status {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the most recent memory entries.
    Memory {
        /// How many entries to show.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = AppConfig::read(&cli.config)?;
    let debug = loaded.as_ref().is_some_and(|c| c.debug);
    init_tracing(if debug { "debug" } else { "info" });

    let config = loaded.unwrap_or_else(|| {
        warn!(path = %cli.config.display(), "config file not found, using defaults");
        AppConfig::default()
    });

    let mut app = App::build(config).context("failed to initialize")?;

    match cli.command {
        Commands::Chat => repl::run(&mut app).await,
        Commands::Summarize => cmd_summarize(&app).await,
        Commands::Status { json } => cmd_status(&app, json).await,
        Commands::Memory { limit } => cmd_memory(&app, limit),
    }
}

/// Install the global tracing subscriber.  `RUST_LOG` overrides the level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn cmd_summarize(app: &App) -> Result<()> {
    let outcome = app.engine.summarize_now().await;
    app.save_cooldowns().await;

    match outcome {
        Ok(SummaryOutcome::Stored {
            entry,
            summarized_turns,
            remaining_turns,
        }) => {
            println!("{}\n", entry.render());
            println!("summarized {summarized_turns} turn(s), {remaining_turns} remaining");
            Ok(())
        }
        Ok(_) => {
            println!("nothing to summarize");
            Ok(())
        }
        Err(e) if e.is_summarize_failure() => {
            println!("summary deferred, conversation kept: {e}");
            Ok(())
        }
        Err(e) => Err(e).context("summarization failed"),
    }
}

async fn cmd_status(app: &App, json: bool) -> Result<()> {
    let report = app.engine.diagnostics().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for role in &report.roles {
        println!("{} ({} of {} eligible)", role.role, role.eligible, role.providers.len());
        for p in &role.providers {
            let state = if p.auth_failure {
                "auth failed, check key".to_owned()
            } else if p.eligible {
                "ready".to_owned()
            } else {
                format!("cooling down {}s", p.cooldown_remaining_secs)
            };
            println!(
                "  {:<2} {:<24} {:<28} failures={:<3} {}",
                p.priority, p.id, p.model, p.failure_count, state
            );
        }
    }
    println!();
    println!(
        "buffer: {} turn(s), {} char(s)",
        report.buffer_turns, report.buffer_chars
    );
    println!("memory: {} entr(ies)", report.memory_entries);
    if let Some(ts) = app.state.last_user_activity {
        println!(
            "last user activity: {} min ago",
            (Utc::now() - ts).num_minutes()
        );
    }
    Ok(())
}

fn cmd_memory(app: &App, limit: usize) -> Result<()> {
    let entries = app.engine.store().recent(limit)?;
    if entries.is_empty() {
        println!("no memories yet");
    }
    for entry in entries {
        println!("{}\n", entry.render());
    }
    Ok(())
}
