//! tokenledger - operator CLI for the proxy's usage database
//!
//! This tool provides commands for:
//! - Checking that persisted usage restores cleanly
//! - Importing and exporting usage snapshots as JSON
//! - Printing per-API, per-model totals
//!
//! File locations:
//! - Database: `storage.path`, or `<storage.auth_dir>/usage.db` (~/.cli-proxy-api/usage.db)
//! - Logs: $XDG_STATE_HOME/tokenledger/tokenledger.log.YYYY-MM-DD, one file per day
//! - Config: $XDG_CONFIG_HOME/tokenledger/config.toml (~/.config/tokenledger/config.toml)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokenledger_core::bridge::SqlitePersistence;
use tokenledger_core::usage::RequestStatistics;
use tokenledger_core::{Config, StatisticsSnapshot, StoreHandle, StoreOptions, UsageStore};

#[derive(Parser)]
#[command(name = "tokenledger")]
#[command(about = "Inspect and maintain the usage database")]
#[command(version)]
struct Args {
    /// Database path (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load every persisted record into a fresh aggregate and report counts
    Restore,

    /// Persist records from a JSON snapshot, skipping ones already stored
    Import {
        /// Snapshot file produced by `export`
        file: PathBuf,
    },

    /// Write all persisted records as a JSON snapshot
    Export {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show request and token totals per API key and model
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        tokenledger_core::logging::init(&config.logging).context("failed to initialize logging")?;

    config.apply_runtime();

    let db_path = args.db.clone().unwrap_or_else(|| config.database_path());
    tracing::info!(path = %db_path.display(), "Opening usage store");

    let options = StoreOptions {
        busy_timeout: config.storage.busy_timeout(),
    };
    let store = UsageStore::open_with(&db_path, &options).context("failed to open usage store")?;
    let store = StoreHandle::new(store);
    store
        .ensure_schema()
        .await
        .context("failed to initialize usage schema")?;

    let result = match args.command {
        Command::Restore => cmd_restore(&store).await,
        Command::Import { file } => cmd_import(&store, &file).await,
        Command::Export { output } => cmd_export(&store, output).await,
        Command::Stats => cmd_stats(&store).await,
    };

    store.close().await.context("failed to close usage store")?;
    result
}

async fn cmd_restore(store: &StoreHandle) -> Result<()> {
    let stats = Arc::new(RequestStatistics::new());
    let persistence = SqlitePersistence::new(Some(store.clone()), Some(stats.clone()));

    let merged = persistence
        .load_and_merge()
        .await
        .context("failed to restore usage statistics")?
        .unwrap_or_default();

    let totals = stats.totals();
    println!("Restore complete:");
    println!("  Records added:   {}", merged.added);
    println!("  Records skipped: {}", merged.skipped);
    println!("  Requests:        {}", totals.requests);
    println!("  Total tokens:    {}", totals.tokens.total_tokens);
    Ok(())
}

async fn cmd_import(store: &StoreHandle, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read snapshot {}", file.display()))?;
    let snapshot: StatisticsSnapshot = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse snapshot {}", file.display()))?;

    let result = store
        .persist_snapshot(snapshot)
        .await
        .context("failed to persist snapshot")?;

    tracing::info!(
        added = result.added,
        skipped = result.skipped,
        "Imported usage snapshot"
    );
    println!("Import complete:");
    println!("  Records added:   {}", result.added);
    println!("  Records skipped: {}", result.skipped);
    Ok(())
}

async fn cmd_export(store: &StoreHandle, output: Option<PathBuf>) -> Result<()> {
    let snapshot = store
        .load_all()
        .await
        .context("failed to load usage records")?;
    let json = serde_json::to_string_pretty(&snapshot).context("failed to encode snapshot")?;

    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!(
                "Exported {} record(s) to {}",
                snapshot.record_count(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn cmd_stats(store: &StoreHandle) -> Result<()> {
    let snapshot = store
        .load_all()
        .await
        .context("failed to load usage records")?;

    let stats = RequestStatistics::new();
    stats.merge_snapshot(&snapshot);

    let rows = stats.model_totals();
    if rows.is_empty() {
        println!("No usage recorded.");
        return Ok(());
    }

    println!(
        "{:<32} {:<28} {:>9} {:>8} {:>14}",
        "API", "MODEL", "REQUESTS", "FAILED", "TOKENS"
    );
    for row in &rows {
        println!(
            "{:<32} {:<28} {:>9} {:>8} {:>14}",
            truncate(&row.api_key, 32),
            truncate(&row.model, 28),
            row.totals.requests,
            row.totals.failed,
            row.totals.tokens.total_tokens
        );
    }

    let totals = stats.totals();
    println!();
    println!(
        "Total: {} request(s), {} failed, {} token(s)",
        totals.requests, totals.failed, totals.tokens.total_tokens
    );
    Ok(())
}

/// Shorten `s` to at most `max` characters, marking the cut with `…`
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept)
}
