//! # PollClaw — group-poll deadline reminder engine
//!
//! Usage:
//!   pollclaw run                 # Periodic loop (default every 300s)
//!   pollclaw run --interval 60   # Custom tick interval
//!   pollclaw tick                # Single pass (for external cron triggers)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pollclaw_channels::{DiscordApi, MentionResolver, NotificationDispatcher};
use pollclaw_core::PollClawConfig;
use pollclaw_reminder::{Orchestrator, SqlitePollDb};

#[derive(Parser)]
#[command(name = "pollclaw", version, about = "🗳 PollClaw — poll deadline reminders")]
struct Cli {
    /// Config file path (default: ~/.pollclaw/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the periodic reminder loop.
    Run {
        /// Override the tick interval, seconds.
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Run exactly one reminder pass and exit.
    Tick,
}

fn build_orchestrator(config: PollClawConfig) -> Result<Orchestrator> {
    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = Arc::new(SqlitePollDb::open(&db_path).context("opening poll database")?);
    let gateway = Arc::new(DiscordApi::new(config.discord.clone()));
    let resolver = MentionResolver::new(gateway.clone(), config.reminder.member_cache_ttl_secs);
    let notifier = Arc::new(NotificationDispatcher::new(gateway, store.clone(), resolver));
    Ok(Orchestrator::new(config, store, notifier))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = format!(
        "pollclaw={level},pollclaw_core={level},pollclaw_reminder={level},pollclaw_channels={level}"
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => PollClawConfig::load_from(path)?,
        None => PollClawConfig::load()?,
    };

    match cli.command {
        Command::Tick => {
            let orchestrator = build_orchestrator(config)?;
            let report = orchestrator.run_once(chrono::Utc::now()).await;
            tracing::info!(?report, "tick finished");
        }
        Command::Run { interval } => {
            let tick_secs = interval.unwrap_or(config.reminder.tick_interval_secs).max(1);
            let orchestrator = build_orchestrator(config)?;
            tracing::info!("⏰ reminder loop started (check every {tick_secs}s)");

            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(tick_secs));
            loop {
                interval.tick().await;
                orchestrator.run_once(chrono::Utc::now()).await;
            }
        }
    }

    Ok(())
}
