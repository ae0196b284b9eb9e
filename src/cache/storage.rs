//! Cache store implementations: SQLite, in-memory and no-op.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use url::Url;

use super::traits::{CacheStore, CachedResponse, RequestKey};
use crate::net::Response;

/// Store that doesn't cache anything.
/// Used when caching is disabled - every lookup misses and writes are dropped.
pub struct NoopStore;

impl CacheStore for NoopStore {
  fn open(&self, _cache_name: &str) -> Result<()> {
    Ok(())
  }

  fn get(&self, _cache_name: &str, _key: &RequestKey) -> Result<Option<CachedResponse>> {
    Ok(None) // Always miss
  }

  fn put(&self, _cache_name: &str, _key: &RequestKey, _response: &Response) -> Result<()> {
    Ok(()) // Discard
  }

  fn put_all(&self, _cache_name: &str, _entries: &[(RequestKey, Response)]) -> Result<()> {
    Ok(()) // Discard
  }

  fn keys(&self, _cache_name: &str) -> Result<Vec<RequestKey>> {
    Ok(Vec::new())
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn delete(&self, _cache_name: &str) -> Result<bool> {
    Ok(false)
  }
}

/// Process-local store. Entries keep insertion order; replacing a key
/// keeps its position.
#[derive(Default)]
pub struct MemoryStore {
  caches: RwLock<BTreeMap<String, Vec<(RequestKey, CachedResponse)>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn write(
    &self,
  ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Vec<(RequestKey, CachedResponse)>>>>
  {
    self
      .caches
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn read(
    &self,
  ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, Vec<(RequestKey, CachedResponse)>>>>
  {
    self
      .caches
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

fn upsert(entries: &mut Vec<(RequestKey, CachedResponse)>, key: &RequestKey, response: &Response) {
  let cached = CachedResponse {
    response: response.clone(),
    cached_at: Utc::now(),
  };

  match entries.iter_mut().find(|(k, _)| k == key) {
    Some((_, existing)) => *existing = cached,
    None => entries.push((key.clone(), cached)),
  }
}

impl CacheStore for MemoryStore {
  fn open(&self, cache_name: &str) -> Result<()> {
    self.write()?.entry(cache_name.to_string()).or_default();
    Ok(())
  }

  fn get(&self, cache_name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let caches = self.read()?;
    Ok(
      caches
        .get(cache_name)
        .and_then(|entries| entries.iter().find(|(k, _)| k == key))
        .map(|(_, cached)| cached.clone()),
    )
  }

  fn put(&self, cache_name: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let mut caches = self.write()?;
    upsert(caches.entry(cache_name.to_string()).or_default(), key, response);
    Ok(())
  }

  fn put_all(&self, cache_name: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    // Single write guard for the whole batch.
    let mut caches = self.write()?;
    let cache = caches.entry(cache_name.to_string()).or_default();
    for (key, response) in entries {
      upsert(cache, key, response);
    }
    Ok(())
  }

  fn keys(&self, cache_name: &str) -> Result<Vec<RequestKey>> {
    let caches = self.read()?;
    Ok(
      caches
        .get(cache_name)
        .map(|entries| entries.iter().map(|(k, _)| k.clone()).collect())
        .unwrap_or_default(),
    )
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    Ok(self.read()?.keys().cloned().collect())
  }

  fn delete(&self, cache_name: &str) -> Result<bool> {
    Ok(self.write()?.remove(cache_name).is_some())
  }
}

/// SQLite-based cache store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at `path`, or at the default location when `None`.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway database that lives as long as the store.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("roma-offline").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per cache generation (cache name / version tag)
CREATE TABLE IF NOT EXISTS caches (
    cache_name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses keyed by request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    response_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_name ON cache_entries(cache_name);
"#;

fn ensure_cache(conn: &Connection, cache_name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO caches (cache_name) VALUES (?)",
      params![cache_name],
    )
    .map_err(|e| eyre!("Failed to create cache {}: {}", cache_name, e))?;
  Ok(())
}

fn insert_entry(
  conn: &Connection,
  cache_name: &str,
  key: &RequestKey,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT INTO cache_entries
         (cache_name, key_hash, method, url, response_url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
       ON CONFLICT (cache_name, key_hash) DO UPDATE SET
         response_url = excluded.response_url,
         status = excluded.status,
         headers = excluded.headers,
         body = excluded.body,
         cached_at = excluded.cached_at",
      params![
        cache_name,
        key.cache_hash(),
        key.method.as_str(),
        key.url.as_str(),
        response.url,
        response.status,
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;

  Ok(())
}

impl CacheStore for SqliteStore {
  fn open(&self, cache_name: &str) -> Result<()> {
    let conn = self.lock()?;
    ensure_cache(&conn, cache_name)
  }

  fn get(&self, cache_name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let row: Option<(String, u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT response_url, status, headers, body, cached_at FROM cache_entries
         WHERE cache_name = ? AND key_hash = ?",
        params![cache_name, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    match row {
      Some((url, status, headers, body, cached_at_str)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key, e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedResponse {
          response: Response {
            url,
            status,
            headers,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, cache_name: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_cache(&tx, cache_name)?;
    insert_entry(&tx, cache_name, key, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn put_all(&self, cache_name: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    // Dropping the transaction on an early return rolls it back.
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_cache(&tx, cache_name)?;
    for (key, response) in entries {
      insert_entry(&tx, cache_name, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn keys(&self, cache_name: &str) -> Result<Vec<RequestKey>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT method, url FROM cache_entries WHERE cache_name = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare key query: {}", e))?;

    let rows: Vec<(String, String)> = stmt
      .query_map(params![cache_name], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to query keys: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read keys: {}", e))?;

    rows
      .into_iter()
      .map(|(method, url)| {
        let method = Method::from_bytes(method.as_bytes())
          .map_err(|e| eyre!("Invalid stored method '{}': {}", method, e))?;
        let url = Url::parse(&url).map_err(|e| eyre!("Invalid stored URL '{}': {}", url, e))?;
        Ok(RequestKey::new(method, url))
      })
      .collect()
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT cache_name FROM caches ORDER BY cache_name")
      .map_err(|e| eyre!("Failed to prepare cache name query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query cache names: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache names: {}", e))?;

    Ok(names)
  }

  fn delete(&self, cache_name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![cache_name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", cache_name, e))?;

    let removed = tx
      .execute("DELETE FROM caches WHERE cache_name = ?", params![cache_name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache_name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(url: &str) -> RequestKey {
    RequestKey::new(Method::GET, Url::parse(url).unwrap())
  }

  fn stores() -> Vec<(&'static str, Box<dyn CacheStore>)> {
    vec![
      ("memory", Box::new(MemoryStore::new()) as Box<dyn CacheStore>),
      ("sqlite", Box::new(SqliteStore::open_in_memory().unwrap()) as Box<dyn CacheStore>),
    ]
  }

  #[test]
  fn test_put_then_get_returns_response() {
    for (name, store) in stores() {
      let k = key("http://localhost/index.html");
      let resp = Response::new("http://localhost/index.html", 200, "<html>")
        .with_header("content-type", "text/html");
      store.put("v1", &k, &resp).unwrap();

      let cached = store.get("v1", &k).unwrap().expect(name);
      assert_eq!(cached.response, resp, "{name}");
    }
  }

  #[test]
  fn test_lookup_is_scoped_to_cache_name() {
    for (name, store) in stores() {
      let k = key("http://localhost/app.js");
      store.put("v1", &k, &Response::new("u", 200, "js")).unwrap();
      assert!(store.get("v2", &k).unwrap().is_none(), "{name}");
    }
  }

  #[test]
  fn test_put_replaces_existing_entry() {
    for (name, store) in stores() {
      let k = key("http://localhost/a");
      store.put("v1", &k, &Response::new("u", 200, "old")).unwrap();
      store.put("v1", &k, &Response::new("u", 200, "new")).unwrap();

      assert_eq!(store.keys("v1").unwrap().len(), 1, "{name}");
      let cached = store.get("v1", &k).unwrap().unwrap();
      assert_eq!(cached.response.body, b"new", "{name}");
    }
  }

  #[test]
  fn test_open_creates_empty_generation() {
    for (name, store) in stores() {
      store.open("roma-imperial-v1").unwrap();
      assert_eq!(store.cache_names().unwrap(), vec!["roma-imperial-v1"], "{name}");
      assert!(store.keys("roma-imperial-v1").unwrap().is_empty(), "{name}");
    }
  }

  #[test]
  fn test_put_all_preserves_order() {
    for (name, store) in stores() {
      let entries = vec![
        (key("http://localhost/shell.html"), Response::new("u", 200, "a")),
        (key("http://localhost/lib.js"), Response::new("u", 200, "b")),
      ];
      store.put_all("v1", &entries).unwrap();

      let keys = store.keys("v1").unwrap();
      let urls: Vec<&str> = keys.iter().map(|k| k.url.as_str()).collect();
      assert_eq!(
        urls,
        vec!["http://localhost/shell.html", "http://localhost/lib.js"],
        "{name}"
      );
    }
  }

  #[test]
  fn test_replace_keeps_key_position() {
    for (name, store) in stores() {
      let a = key("http://localhost/a");
      let b = key("http://localhost/b");
      store.put("v1", &a, &Response::new("u", 200, "old")).unwrap();
      store.put("v1", &b, &Response::new("u", 200, "b")).unwrap();
      store.put("v1", &a, &Response::new("u", 200, "new")).unwrap();

      assert_eq!(store.keys("v1").unwrap(), vec![a.clone(), b], "{name}");
      assert_eq!(store.get("v1", &a).unwrap().unwrap().response.body, b"new", "{name}");
    }
  }

  #[test]
  fn test_delete_removes_generation_and_entries() {
    for (name, store) in stores() {
      let k = key("http://localhost/a");
      store.put("old", &k, &Response::new("u", 200, "x")).unwrap();
      store.open("new").unwrap();

      assert!(store.delete("old").unwrap(), "{name}");
      assert!(!store.delete("old").unwrap(), "{name}");
      assert!(store.get("old", &k).unwrap().is_none(), "{name}");
      assert_eq!(store.cache_names().unwrap(), vec!["new"], "{name}");
    }
  }

  #[test]
  fn test_noop_store_always_misses() {
    let store = NoopStore;
    let k = key("http://localhost/a");
    store.put("v1", &k, &Response::new("u", 200, "x")).unwrap();
    assert!(store.get("v1", &k).unwrap().is_none());
    assert!(store.cache_names().unwrap().is_empty());
  }

  #[test]
  fn test_parse_sqlite_datetime() {
    let dt = parse_datetime("2024-05-01 09:30:00").unwrap();
    assert_eq!(dt.to_rfc3339(), "2024-05-01T09:30:00+00:00");
    assert!(parse_datetime("not a date").is_err());
  }
}
