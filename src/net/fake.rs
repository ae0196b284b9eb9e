//! Scripted fetcher for tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::client::Fetcher;
use super::types::{Request, Response};

/// Answers from a fixed URL -> (status, body) table. Unknown URLs and
/// offline mode fail like a dropped connection.
#[derive(Default)]
pub struct FakeFetcher {
  routes: Mutex<HashMap<String, (u16, Vec<u8>)>>,
  offline: AtomicBool,
  calls: AtomicUsize,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(self, url: &str, status: u16, body: &str) -> Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), (status, body.as_bytes().to_vec()));
    self
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Fetcher for FakeFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to fetch {}: network unavailable", request.url));
    }

    let route = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
    match route {
      Some((status, body)) => Ok(Response::new(request.url.as_str(), status, body)),
      None => Err(eyre!("Failed to fetch {}: connection refused", request.url)),
    }
  }
}
