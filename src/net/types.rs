//! Request and response types shared by the worker, the stores and the network client.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use url::Url;

/// A request descriptor as seen by the worker: method and absolute URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self { method, url }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// Parse a possibly relative URL (e.g. `./index.html`) against `base`.
  pub fn parse(method: Method, raw: &str, base: &Url) -> Result<Self> {
    let url = Url::options()
      .base_url(Some(base))
      .parse(raw)
      .map_err(|e| eyre!("Invalid URL '{}': {}", raw, e))?;

    Ok(Self::new(method, url))
  }
}

/// A response body together with the metadata needed to replay it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  /// Final URL after redirects
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      url: url.into(),
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  #[cfg(test)]
  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}
