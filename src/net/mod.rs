//! Network side of the worker: request/response types and the HTTP fetcher.

mod client;
#[cfg(test)]
pub mod fake;
mod types;

pub use client::{Fetcher, HttpFetcher};
pub use types::{Request, Response};
