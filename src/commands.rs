use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::process::ExitCode;
use tracing::error;

use crate::cache::{CacheStore, OfflineWorker};
use crate::event::EventHost;
use crate::net::{Fetcher, Request};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Pre-cache every asset of the app shell (all or nothing)
  Install,
  /// Request URLs through the worker, cache-first
  Fetch {
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET", value_parser = parse_method)]
    method: Method,
    /// Write response bodies to stdout instead of a status line
    #[arg(long)]
    body: bool,
    /// URLs to request; relative ones resolve against base_url
    #[arg(required = true)]
    urls: Vec<String>,
  },
  /// List cache generations, or the entries of one generation
  List {
    /// Cache name to list entries for
    #[arg(long)]
    cache: Option<String>,
  },
  /// Delete every cache generation except the current one
  Prune,
  /// Print the resolved asset list
  Assets,
}

fn parse_method(s: &str) -> Result<Method, String> {
  Method::from_bytes(s.to_ascii_uppercase().as_bytes()).map_err(|e| e.to_string())
}

/// Run a subcommand against `worker`.
pub async fn run<S, F>(
  worker: OfflineWorker<S, F>,
  command: Command,
  base: &url::Url,
) -> Result<ExitCode>
where
  S: CacheStore + 'static,
  F: Fetcher + 'static,
{
  match command {
    Command::Install => {
      let host = EventHost::spawn(worker.clone());
      let cached = host.install().await?;
      let stored = worker.store().keys(worker.cache_name())?.len();
      println!("{}", install_summary(worker.cache_name(), cached, stored));
      Ok(ExitCode::SUCCESS)
    }
    Command::Fetch { method, body, urls } => {
      let requests = urls
        .iter()
        .map(|raw| Request::parse(method.clone(), raw, base))
        .collect::<Result<Vec<_>>>()?;
      fetch(worker, requests, body).await
    }
    Command::List { cache } => {
      list(&worker, cache.as_deref())?;
      Ok(ExitCode::SUCCESS)
    }
    Command::Prune => {
      let removed = worker.prune()?;
      if removed.is_empty() {
        println!("Nothing to prune");
      }
      for name in removed {
        println!("Deleted {}", name);
      }
      Ok(ExitCode::SUCCESS)
    }
    Command::Assets => {
      for asset in worker.assets() {
        println!("{}", asset.url);
      }
      Ok(ExitCode::SUCCESS)
    }
  }
}

/// `stored` is what the store reports holding afterwards; it stays at zero
/// when caching is disabled.
fn install_summary(cache_name: &str, cached: usize, stored: usize) -> String {
  if cached > 0 && stored == 0 {
    format!(
      "Fetched {} assets for {}, but caching is disabled so nothing was stored",
      cached, cache_name
    )
  } else {
    format!("Installed {} assets into {}", cached, cache_name)
  }
}

/// One fetch event per request, all in flight at once.
async fn fetch<S, F>(
  worker: OfflineWorker<S, F>,
  requests: Vec<Request>,
  body: bool,
) -> Result<ExitCode>
where
  S: CacheStore + 'static,
  F: Fetcher + 'static,
{
  let host = EventHost::spawn(worker);
  let outcomes =
    futures::future::join_all(requests.iter().map(|req| host.fetch(req.clone()))).await;

  let mut stdout = std::io::stdout().lock();
  let mut failed = false;

  for (request, outcome) in requests.iter().zip(outcomes) {
    match outcome {
      Ok(result) if body => stdout
        .write_all(&result.data.body)
        .map_err(|e| eyre!("Failed to write body: {}", e))?,
      Ok(result) => writeln!(
        stdout,
        "{} {:<7} {} {}",
        result.data.status, result.source, request.method, request.url
      )
      .map_err(|e| eyre!("Failed to write output: {}", e))?,
      Err(e) => {
        error!(url = %request.url, "{:#}", e);
        failed = true;
      }
    }
  }

  Ok(if failed {
    ExitCode::FAILURE
  } else {
    ExitCode::SUCCESS
  })
}

fn list<S, F>(worker: &OfflineWorker<S, F>, cache: Option<&str>) -> Result<()>
where
  S: CacheStore,
  F: Fetcher,
{
  let store = worker.store();

  let Some(name) = cache else {
    for name in store.cache_names()? {
      let marker = if name == worker.cache_name() { "*" } else { " " };
      println!("{} {} ({} entries)", marker, name, store.keys(&name)?.len());
    }
    return Ok(());
  };

  for key in store.keys(name)? {
    match store.get(name, &key)? {
      Some(cached) => println!(
        "{} {} {:<24} {}",
        cached.response.status,
        cached.cached_at.format("%Y-%m-%d %H:%M:%S"),
        cached.response.header("content-type").unwrap_or("-"),
        key
      ),
      None => println!("--- {}", key),
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_method_is_case_insensitive() {
    assert_eq!(parse_method("post").unwrap(), Method::POST);
    assert_eq!(parse_method("GET").unwrap(), Method::GET);
  }

  #[test]
  fn test_install_summary_reports_stored_assets() {
    assert_eq!(
      install_summary("roma-imperial-v1", 6, 6),
      "Installed 6 assets into roma-imperial-v1"
    );
  }

  #[test]
  fn test_install_summary_notes_disabled_caching() {
    let summary = install_summary("roma-imperial-v1", 6, 0);
    assert!(summary.contains("caching is disabled"));
    assert!(!summary.starts_with("Installed"));
  }

  #[test]
  fn test_parse_method_rejects_garbage() {
    assert!(parse_method("GE T").is_err());
  }
}
