//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::net::{Request, Response};

/// Request identity used as the cache key: method plus URL.
///
/// Fragments are dropped since they never reach the server. Headers are
/// not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: Method,
  pub url: Url,
}

impl RequestKey {
  pub fn new(method: Method, mut url: Url) -> Self {
    url.set_fragment(None);
    Self { method, url }
  }

  /// SHA256 of `METHOD url`, stable and fixed-length for storage.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl From<&Request> for RequestKey {
  fn from(request: &Request) -> Self {
    Self::new(request.method.clone(), request.url.clone())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// A stored response and when it was written.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Storage capability backing a named cache generation.
///
/// Every operation is scoped by `cache_name`. Implementations must make
/// `get` and `put` atomic per key, and `put_all` atomic as a whole.
pub trait CacheStore: Send + Sync {
  /// Open (or create) the named cache.
  fn open(&self, cache_name: &str) -> Result<()>;

  /// Exact-match lookup by request identity.
  fn get(&self, cache_name: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Insert or replace one entry, creating the cache if needed.
  fn put(&self, cache_name: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Insert all entries or none of them.
  fn put_all(&self, cache_name: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Keys stored in the named cache, in first-insertion order.
  /// Replacing an entry keeps its position.
  fn keys(&self, cache_name: &str) -> Result<Vec<RequestKey>>;

  /// Names of every cache generation present.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Delete a whole generation. Returns whether it existed.
  fn delete(&self, cache_name: &str) -> Result<bool>;
}

/// Result from a fetch interception, including where the response came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched from network on a cache miss
  Network,
  /// Served from the cache store without a network call
  Cache,
}

impl fmt::Display for CacheSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Network => f.pad("network"),
      Self::Cache => f.pad("cache"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(method: Method, url: &str) -> RequestKey {
    RequestKey::new(method, Url::parse(url).unwrap())
  }

  #[test]
  fn test_fragment_is_not_part_of_identity() {
    let a = key(Method::GET, "https://unpkg.com/leaflet.css#top");
    let b = key(Method::GET, "https://unpkg.com/leaflet.css");
    assert_eq!(a, b);
    assert_eq!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn test_method_is_part_of_identity() {
    let get = key(Method::GET, "https://example.com/api");
    let post = key(Method::POST, "https://example.com/api");
    assert_ne!(get.cache_hash(), post.cache_hash());
  }

  #[test]
  fn test_query_string_is_part_of_identity() {
    let a = key(Method::GET, "https://fonts.googleapis.com/css2?family=A");
    let b = key(Method::GET, "https://fonts.googleapis.com/css2?family=B");
    assert_ne!(a, b);
  }

  #[test]
  fn test_source_display_honors_width() {
    assert_eq!(format!("[{:<7}]", CacheSource::Cache), "[cache  ]");
    assert_eq!(format!("[{:<7}]", CacheSource::Network), "[network]");
  }

  #[test]
  fn test_cache_hash_is_hex_sha256() {
    let hash = key(Method::GET, "http://localhost/index.html").cache_hash();
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
  }
}
