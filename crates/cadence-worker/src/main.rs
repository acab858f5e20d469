use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use cadence_core::CadenceConfig;
use cadence_store::SqliteJobStore;

mod commands;
mod webhook;

#[derive(Debug, Parser)]
#[command(name = "cadence-worker", version, about = "Persistent multi-worker job scheduler")]
struct Cli {
    /// Path to cadence.toml (default: ~/.cadence/cadence.toml).
    #[arg(long, global = true, env = "CADENCE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduling engine until SIGINT/SIGTERM.
    Run,
    /// Create a pending job.
    Add {
        name: String,
        /// JSON payload handed to the executor.
        #[arg(long, default_value = "{}")]
        payload: String,
        /// RFC 3339 instant the job becomes due (default: now).
        #[arg(long)]
        at: Option<String>,
        /// none, daily or weekly.
        #[arg(long, default_value = "none")]
        recurrence: String,
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// List jobs, optionally filtered by status.
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one job.
    Show { id: String },
    /// Change fields of an existing job.
    Update {
        id: String,
        #[command(flatten)]
        edits: commands::JobEdits,
    },
    /// Show a job's execution log.
    Logs { id: String },
    /// Delete a job and its log.
    Remove { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries command output; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_worker=info,cadence_scheduler=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let store = Arc::new(SqliteJobStore::open(
        db_path,
        Duration::from_millis(config.database.busy_timeout_ms),
    )?);

    match cli.command {
        Command::Run => commands::run(&config, store).await,
        Command::Add {
            name,
            payload,
            at,
            recurrence,
            max_retries,
        } => commands::add(
            store.as_ref(),
            &name,
            &payload,
            at.as_deref(),
            &recurrence,
            max_retries.unwrap_or(config.jobs.max_retries),
        ),
        Command::List { status } => commands::list(store.as_ref(), status.as_deref()),
        Command::Show { id } => commands::show(store.as_ref(), &id),
        Command::Update { id, edits } => commands::update(store.as_ref(), &id, &edits),
        Command::Logs { id } => commands::logs(store.as_ref(), &id),
        Command::Remove { id } => commands::remove(store.as_ref(), &id),
    }
}

/// Unreadable config falls back to defaults; a config that parses but fails
/// validation stops the worker instead of silently switching database or
/// lock backend.
fn load_config(path: Option<&str>) -> anyhow::Result<CadenceConfig> {
    let config = CadenceConfig::extract(path).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    });
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
