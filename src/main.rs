//! Gamelog Watcher - incremental game log tailer and event classifier.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gamelog_watcher::config::{AppConfig, ConfigError, ConfigLoader};
use gamelog_watcher::display;
use gamelog_watcher::store::{EventStore, StoreError};
use gamelog_watcher::watcher::{LogWatcher, WatcherError, WatcherHandle};

#[derive(Parser)]
#[command(
    name = "gamelog-watcher",
    about = "Incremental game log tailer and event classifier",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file to use instead of the default search paths.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the log directory and store new events.
    Watch {
        /// Log directory (overrides the config file).
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Only report lines after this RFC 3339 timestamp.
        #[arg(long)]
        since: Option<String>,
        /// Event database path (overrides the config file).
        #[arg(long)]
        db: Option<PathBuf>,
        /// Print events without storing them.
        #[arg(long)]
        no_store: bool,
        /// Do not truncate long field values.
        #[arg(long)]
        raw: bool,
    },
    /// Read the log directory once and print events as JSON rows.
    Scan {
        /// Log directory (overrides the config file).
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Only report lines after this RFC 3339 timestamp.
        #[arg(long)]
        since: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("No log directory given; pass --dir or set watcher.log_dir")]
    MissingLogDir,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Watcher(#[from] WatcherError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to encode event: {0}")]
    Json(#[from] serde_json::Error),
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    path.map_or_else(ConfigLoader::new, ConfigLoader::with_path)
        .load()
}

fn resolve_log_dir(dir: Option<PathBuf>, config: &AppConfig) -> Result<PathBuf, CliError> {
    dir.or_else(|| config.watcher.log_dir.clone())
        .ok_or(CliError::MissingLogDir)
}

/// Activate from `--since` if given, else from `fallback`.
fn activate(
    handle: &WatcherHandle,
    since: Option<&str>,
    fallback: DateTime<Utc>,
) -> Result<DateTime<Utc>, WatcherError> {
    match since {
        Some(since) => handle.activate(since)?,
        None => handle.activate_at(fallback),
    }
    Ok(handle.watermark().unwrap_or(fallback))
}

/// Move up to `limit` events from the sink into the store. A batch the
/// store rejects stays in the sink for the next attempt.
async fn store_batch(store: Option<&EventStore>, handle: &WatcherHandle, limit: usize) -> u64 {
    let Some(store) = store else {
        handle.sink().drain(limit);
        return 0;
    };
    match store.flush_sink(handle.sink(), limit).await {
        Ok(written) => written as u64,
        Err(e) => {
            tracing::warn!(error = %e, pending = handle.sink().len(), "Failed to store events, will retry");
            0
        }
    }
}

async fn watch(
    mut config: AppConfig,
    dir: Option<PathBuf>,
    since: Option<String>,
    db: Option<PathBuf>,
    no_store: bool,
    raw: bool,
) -> Result<(), CliError> {
    let dir = resolve_log_dir(dir, &config)?;
    let store = if no_store {
        None
    } else {
        Some(EventStore::open(db.unwrap_or_else(|| config.store.path.clone())).await?)
    };

    let resume_from = match &store {
        Some(store) => store.latest_timestamp().await?,
        None => None,
    };

    config.watcher.live_feed = true;
    let watcher = LogWatcher::new(&dir, &config.watcher)?;
    let handle = watcher.handle();
    let watermark = activate(
        &handle,
        since.as_deref(),
        resume_from.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    )?;
    display::print_watch_start(&dir, watermark);

    let cancel = CancellationToken::new();
    let task = watcher.spawn(cancel.clone());
    let limit = config.watcher.drain_limit;
    let mut interval = tokio::time::interval(config.watcher.poll_interval());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut stored = 0u64;

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            _ = interval.tick() => {
                stored += store_batch(store.as_ref(), &handle, limit).await;
                for event in handle.sink().drain_live(limit) {
                    display::print_event(&event, raw);
                }
            }
        }
    }

    cancel.cancel();
    if let Err(e) = task.await {
        tracing::warn!(error = %e, "Log watcher task failed");
    }
    while !handle.sink().is_empty() {
        let before = handle.sink().len();
        stored += store_batch(store.as_ref(), &handle, limit).await;
        if handle.sink().len() >= before {
            break;
        }
    }

    display::print_watch_summary(store.as_ref().map(|_| stored), handle.closed_gracefully());
    Ok(())
}

async fn scan(
    config: AppConfig,
    dir: Option<PathBuf>,
    since: Option<String>,
) -> Result<(), CliError> {
    let dir = resolve_log_dir(dir, &config)?;
    let mut watcher = LogWatcher::new(&dir, &config.watcher)?;
    let handle = watcher.handle();
    activate(&handle, since.as_deref(), DateTime::<Utc>::UNIX_EPOCH)?;

    let stats = watcher.tick().await;
    tracing::info!(
        files = stats.files_read,
        events = stats.events,
        "Scan complete"
    );

    for event in handle.sink().drain(usize::MAX) {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match load_config(cli.config) {
        Err(e) => Err(CliError::from(e)),
        Ok(config) => match cli.command {
            Commands::Watch {
                dir,
                since,
                db,
                no_store,
                raw,
            } => watch(config, dir, since, db, no_store, raw).await,
            Commands::Scan { dir, since } => scan(config, dir, since).await,
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
