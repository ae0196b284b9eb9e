use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::net::Request;

/// Cache generation tag. Bump it to invalidate everything cached before.
pub const CACHE_NAME: &str = "roma-imperial-v1";

/// Application shell plus the third-party resources it loads.
pub const URLS_TO_CACHE: &[&str] = &[
  "./index.html",
  "https://cdn.tailwindcss.com",
  "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css",
  "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js",
  "https://unpkg.com/@babel/standalone/babel.min.js",
  "https://fonts.googleapis.com/css2?family=Roboto+Condensed:wght@300;400;700&display=swap",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  pub cache_name: String,
  /// Origin the app shell is served from; relative assets resolve against it
  pub base_url: String,
  pub assets: Vec<String>,
  pub storage: StorageKind,
  /// SQLite database path (defaults to $XDG_DATA_HOME/roma-offline/cache.db)
  pub database: Option<PathBuf>,
  /// Whole-request timeout; unset leaves it to the transport
  pub timeout_secs: Option<u64>,
  pub user_agent: String,
  /// Write logs to this file instead of stderr
  pub log_file: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      cache_name: CACHE_NAME.to_string(),
      base_url: "http://localhost:8080/".to_string(),
      assets: URLS_TO_CACHE.iter().map(|s| s.to_string()).collect(),
      storage: StorageKind::default(),
      database: None,
      timeout_secs: None,
      user_agent: concat!("roma-offline/", env!("CARGO_PKG_VERSION")).to_string(),
      log_file: None,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
  /// Persistent SQLite database
  #[default]
  Sqlite,
  /// Process-local map, gone on exit
  Memory,
  /// No caching at all - every request goes to network
  Disabled,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./roma-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/roma-offline/config.yaml
  ///
  /// Built-in defaults are used when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("roma-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("roma-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse: {}", e))?;

    if config.cache_name.trim().is_empty() {
      return Err(eyre!("cache_name must not be empty"));
    }

    Ok(config)
  }

  pub fn base_url(&self) -> Result<Url> {
    Url::parse(&self.base_url).map_err(|e| eyre!("Invalid base_url '{}': {}", self.base_url, e))
  }

  /// The asset list as GET requests with absolute URLs.
  pub fn asset_requests(&self) -> Result<Vec<Request>> {
    let base = self.base_url()?;
    self
      .assets
      .iter()
      .map(|raw| Request::parse(Method::GET, raw, &base))
      .collect()
  }
}
