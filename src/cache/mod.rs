//! Versioned request/response cache and the offline worker built on it.
//!
//! This module provides:
//! - A `CacheStore` capability keyed by request identity (method + URL)
//! - SQLite, in-memory and no-op store backends
//! - `OfflineWorker`, which pre-caches a fixed asset list on install and
//!   serves intercepted requests cache-first with passive refresh

mod storage;
mod traits;
mod worker;

pub use storage::{MemoryStore, NoopStore, SqliteStore};
pub use traits::{CacheResult, CacheSource, CacheStore};
pub use worker::OfflineWorker;
