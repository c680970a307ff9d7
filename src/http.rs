//! Request and response values the worker operates on.
//!
//! These are deliberately detached from both `axum` and `reqwest` so the
//! strategies can be exercised without a server or a socket.

use bytes::Bytes;
use url::Url;

/// How a response came to exist, mirroring the fetch `Response.type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response with readable body
  Cors,
  /// Cross-origin response without CORS
  Opaque,
  /// Synthesized locally (fallbacks)
  Default,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
      Self::Default => "default",
    }
  }

  pub fn from_name(name: &str) -> Option<Self> {
    match name {
      "basic" => Some(Self::Basic),
      "cors" => Some(Self::Cors),
      "opaque" => Some(Self::Opaque),
      "default" => Some(Self::Default),
      _ => None,
    }
  }
}

/// An intercepted page request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl Request {
  /// A body-less GET for `url`.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      headers: Vec::new(),
      body: Bytes::new(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Only GET requests take part in caching.
  pub fn is_retrieval(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }
}

/// A response flowing back to the page.
#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
  pub response_type: ResponseType,
}

impl Response {
  pub fn new(status: u16, response_type: ResponseType) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: Bytes::new(),
      response_type,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = body.into();
    self
  }

  #[cfg(test)]
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  /// Whether this response may be written to a partition.
  ///
  /// Only complete same-origin 200s qualify; redirects, errors and
  /// cross-origin responses never do.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.response_type == ResponseType::Basic
  }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(k, _)| k.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}
