use color_eyre::{eyre::eyre, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::cache::{CacheResult, CacheStore, OfflineWorker};
use crate::net::{Fetcher, Request, Response};

/// Events delivered to the worker by its host
#[derive(Debug)]
pub enum WorkerEvent {
  /// Lifecycle event: populate the cache with the asset list
  Install,
  /// An outgoing request that needs a response
  Fetch(Request),
}

/// What a handled event produced
#[derive(Debug)]
pub enum EventOutcome {
  /// Install committed this many entries
  Installed { cached: usize },
  /// Response for a fetch event
  Responded(CacheResult<Response>),
}

struct Envelope {
  event: WorkerEvent,
  reply: oneshot::Sender<Result<EventOutcome>>,
}

/// Host that runs each event to completion on its own task.
///
/// Events are handed over through a channel; the receiving loop spawns one
/// task per event, so fetches for different requests proceed concurrently
/// while each single event stays one sequential pipeline.
#[derive(Clone)]
pub struct EventHost {
  tx: mpsc::UnboundedSender<Envelope>,
}

impl EventHost {
  /// Start the dispatch loop for `worker`. Must be called inside a tokio runtime.
  pub fn spawn<S, F>(worker: OfflineWorker<S, F>) -> Self
  where
    S: CacheStore + 'static,
    F: Fetcher + 'static,
  {
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    tokio::spawn(async move {
      while let Some(Envelope { event, reply }) = rx.recv().await {
        let worker = worker.clone();
        tokio::spawn(async move {
          let outcome = worker.dispatch(event).await;
          if reply.send(outcome).is_err() {
            debug!("Event caller went away before the outcome was ready");
          }
        });
      }
    });

    Self { tx }
  }

  /// Deliver an event and wait for its outcome.
  pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
    let (reply, outcome) = oneshot::channel();

    self
      .tx
      .send(Envelope { event, reply })
      .map_err(|_| eyre!("Event host has shut down"))?;

    outcome
      .await
      .map_err(|_| eyre!("Event handler dropped without an outcome"))?
  }

  pub async fn install(&self) -> Result<usize> {
    match self.dispatch(WorkerEvent::Install).await? {
      EventOutcome::Installed { cached } => Ok(cached),
      EventOutcome::Responded(_) => Err(eyre!("Install event answered with a response")),
    }
  }

  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>> {
    match self.dispatch(WorkerEvent::Fetch(request)).await? {
      EventOutcome::Responded(result) => Ok(result),
      EventOutcome::Installed { .. } => Err(eyre!("Fetch event answered with an install outcome")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryStore};
  use crate::net::fake::FakeFetcher;
  use url::Url;

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[tokio::test]
  async fn test_install_then_fetch_through_host() {
    let fetcher = FakeFetcher::new().route("http://localhost/index.html", 200, "<html>");
    let worker = OfflineWorker::new(
      MemoryStore::new(),
      fetcher,
      "roma-imperial-v1",
      vec![get("http://localhost/index.html")],
    );
    let host = EventHost::spawn(worker);

    assert_eq!(host.install().await.unwrap(), 1);
    let result = host.fetch(get("http://localhost/index.html")).await.unwrap();
    assert_eq!(result.source, CacheSource::Cache);
  }

  #[tokio::test]
  async fn test_concurrent_fetches_are_independent() {
    let urls: Vec<String> = (0..8).map(|i| format!("http://localhost/tile/{}.png", i)).collect();
    let fetcher = urls
      .iter()
      .fold(FakeFetcher::new(), |f, u| f.route(u, 200, "png"));
    let worker = OfflineWorker::new(MemoryStore::new(), fetcher, "v1", Vec::new());
    let host = EventHost::spawn(worker.clone());

    let results =
      futures::future::join_all(urls.iter().map(|u| host.fetch(get(u)))).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(worker.store().keys("v1").unwrap().len(), urls.len());
  }

  #[tokio::test]
  async fn test_failed_fetch_reaches_caller() {
    let worker = OfflineWorker::new(MemoryStore::new(), FakeFetcher::new(), "v1", Vec::new());
    let host = EventHost::spawn(worker);

    assert!(host.fetch(get("http://localhost/nowhere")).await.is_err());
  }
}
