use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use reqwest::header::HeaderMap;
use std::time::Duration;

use crate::config::Config;

use super::types::{Request, Response};

/// Network capability used by the worker on a cache miss.
///
/// A returned `Ok` means the server answered, whatever the status code.
/// Transport failures (DNS, refused connection, timeout) are `Err`.
pub trait Fetcher: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// HTTP client wrapper
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(config: &Config) -> Result<Self> {
    let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());

    if let Some(secs) = config.timeout_secs {
      builder = builder.timeout(Duration::from_secs(secs));
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {} {}: {}", request.method, request.url, e))?;

    let url = response.url().to_string();
    let status = response.status().as_u16();
    let headers = header_pairs(response.headers());

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      headers,
      ..Response::new(url, status, body.to_vec())
    })
  }
}

/// Header values that are not valid UTF-8 keep their place with the bad
/// bytes replaced, so a cached replay has the same header set.
fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
  headers
    .iter()
    .map(|(name, value)| {
      (
        name.as_str().to_string(),
        String::from_utf8_lossy(value.as_bytes()).into_owned(),
      )
    })
    .collect()
}
