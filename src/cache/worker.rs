//! Offline cache worker: pre-caches the application shell on install and
//! answers intercepted requests cache-first.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::traits::{CacheResult, CacheStore, RequestKey};
use crate::event::{EventOutcome, WorkerEvent};
use crate::net::{Fetcher, Request, Response};

/// Cache worker for one cache generation.
///
/// Cloning is cheap; clones share the store and the fetcher, so one worker
/// can serve many concurrent fetch events.
pub struct OfflineWorker<S: CacheStore, F: Fetcher> {
  store: Arc<S>,
  fetcher: Arc<F>,
  cache_name: Arc<str>,
  assets: Arc<[Request]>,
}

impl<S: CacheStore, F: Fetcher> OfflineWorker<S, F> {
  /// Create a worker for `cache_name` that pre-caches `assets` on install.
  pub fn new(store: S, fetcher: F, cache_name: &str, assets: Vec<Request>) -> Self {
    Self {
      store: Arc::new(store),
      fetcher: Arc::new(fetcher),
      cache_name: Arc::from(cache_name),
      assets: Arc::from(assets),
    }
  }

  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  pub fn assets(&self) -> &[Request] {
    &self.assets
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  /// Route an event to its handler.
  pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
    match event {
      WorkerEvent::Install => self
        .install()
        .await
        .map(|cached| EventOutcome::Installed { cached }),
      WorkerEvent::Fetch(request) => self.handle_fetch(&request).await.map(EventOutcome::Responded),
    }
  }

  /// Populate the cache with every asset, or with none of them.
  ///
  /// Assets are fetched with GET one after another. A transport error or a
  /// non-2xx status on any of them aborts the install before anything is
  /// written. A list naming the same request twice is rejected up front.
  /// Returns the number of entries stored.
  pub async fn install(&self) -> Result<usize> {
    info!(cache = %self.cache_name, assets = self.assets.len(), "Installing");

    let mut seen = HashSet::with_capacity(self.assets.len());
    for asset in self.assets.iter() {
      let key = RequestKey::from(&Request::get(asset.url.clone()));
      if !seen.insert(key.clone()) {
        return Err(eyre!(
          "Install of {} failed: asset list contains {} twice",
          self.cache_name,
          key
        ));
      }
    }

    self.store.open(&self.cache_name)?;

    let mut entries = Vec::with_capacity(self.assets.len());
    for asset in self.assets.iter() {
      let request = Request::get(asset.url.clone());
      let response = self
        .fetcher
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Install of {} failed: {}", self.cache_name, e))?;

      if !response.is_success() {
        return Err(eyre!(
          "Install of {} failed: {} answered with status {}",
          self.cache_name,
          request.url,
          response.status
        ));
      }

      debug!(url = %request.url, status = response.status, "Fetched asset");
      entries.push((RequestKey::from(&request), response));
    }

    self
      .store
      .put_all(&self.cache_name, &entries)
      .map_err(|e| eyre!("Install of {} failed: {}", self.cache_name, e))?;

    info!(cache = %self.cache_name, cached = entries.len(), "Installed");
    Ok(entries.len())
  }

  /// Answer a request cache-first, falling back to network.
  ///
  /// 1. Exact lookup by method + URL; a hit is returned without network
  /// 2. On a miss, fetch from network; a transport failure is returned as-is
  /// 3. GET responses with status 200 are stored before being returned
  pub async fn handle_fetch(&self, request: &Request) -> Result<CacheResult<Response>> {
    let key = RequestKey::from(request);

    if let Some(cached) = self.store.get(&self.cache_name, &key)? {
      debug!(%key, "Cache hit");
      return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
    }

    debug!(%key, "Cache miss");
    let response = self.fetcher.fetch(request).await?;

    if is_cacheable(&request.method, &response) {
      // Opportunistic: a failed write must not cost the caller its response.
      match self.store.put(&self.cache_name, &key, &response) {
        Ok(()) => debug!(%key, "Stored"),
        Err(e) => warn!(%key, error = %e, "Failed to store response"),
      }
    } else {
      debug!(%key, status = response.status, "Not cacheable");
    }

    Ok(CacheResult::from_network(response))
  }

  /// Delete every cache generation except the current one.
  pub fn prune(&self) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for name in self.store.cache_names()? {
      if name != *self.cache_name && self.store.delete(&name)? {
        info!(cache = %name, "Deleted superseded cache");
        removed.push(name);
      }
    }
    Ok(removed)
  }
}

/// Only successful GETs are kept.
fn is_cacheable(method: &Method, response: &Response) -> bool {
  *method == Method::GET && response.status == 200
}

impl<S: CacheStore, F: Fetcher> Clone for OfflineWorker<S, F> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      fetcher: Arc::clone(&self.fetcher),
      cache_name: Arc::clone(&self.cache_name),
      assets: Arc::clone(&self.assets),
    }
  }
}
