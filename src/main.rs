mod cache;
mod commands;
mod config;
mod event;
mod net;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::cache::{CacheStore, MemoryStore, NoopStore, OfflineWorker, SqliteStore};
use crate::config::{Config, StorageKind};
use crate::net::HttpFetcher;

#[derive(Parser, Debug)]
#[command(name = "roma-offline")]
#[command(about = "Offline cache worker for the Roma Imperial shore excursion guide")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/roma-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache generation to use instead of the configured one
  #[arg(long)]
  cache_name: Option<String>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override cache name if specified on command line
  let config = if let Some(cache_name) = args.cache_name {
    Config { cache_name, ..config }
  } else {
    config
  };

  let _guard = init_tracing(args.log_file.as_deref().or(config.log_file.as_deref()))?;

  match config.storage {
    StorageKind::Sqlite => {
      let store = SqliteStore::open(config.database.as_deref())?;
      run(store, &config, args.command).await
    }
    StorageKind::Memory => run(MemoryStore::new(), &config, args.command).await,
    StorageKind::Disabled => run(NoopStore, &config, args.command).await,
  }
}

async fn run<S: CacheStore + 'static>(
  store: S,
  config: &Config,
  command: commands::Command,
) -> Result<ExitCode> {
  let fetcher = HttpFetcher::new(config)?;
  let assets = config.asset_requests()?;
  let worker = OfflineWorker::new(store, fetcher, &config.cache_name, assets);

  commands::run(worker, command, &config.base_url()?).await
}

/// Log to `log_file` when given, stderr otherwise. Filter with RUST_LOG.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roma_offline=info"));

  match log_file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;

      let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

      Ok(None)
    }
  }
}
