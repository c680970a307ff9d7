//! Network access for the worker.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use url::{Origin, Url};

use crate::http::{Request, Response, ResponseType};

/// The worker's only way to reach the network.
///
/// An `Err` means the fetch itself failed (connection refused, DNS, reset).
/// HTTP error statuses are successful fetches and come back as `Ok`.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Forwards requests with `reqwest`, classifying responses against the
/// application origin.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Origin,
}

impl HttpNetwork {
  pub fn new(origin: &Url) -> Result<Self> {
    // Redirects are surfaced to the page untouched, never followed here.
    let client = reqwest::Client::builder()
      .redirect(reqwest::redirect::Policy::none())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: origin.origin(),
    })
  }
}

fn classify(origin: &Origin, url: &Url) -> ResponseType {
  if url.origin() == *origin {
    ResponseType::Basic
  } else {
    ResponseType::Cors
  }
}

/// Hop-by-hop headers that must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
  "connection",
  "keep-alive",
  "proxy-connection",
  "transfer-encoding",
  "upgrade",
  "te",
  "trailer",
  "host",
  "content-length",
];

fn is_forwardable(name: &str) -> bool {
  !HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in request.headers.iter().filter(|(n, _)| is_forwardable(n)) {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let response_type = classify(&self.origin, response.url());
    let headers = response
      .headers()
      .iter()
      .filter(|(name, _)| is_forwardable(name.as_str()))
      .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status,
      headers,
      body,
      response_type,
    })
  }
}
