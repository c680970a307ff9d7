//! Test doubles shared by unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::http::{Request, Response, ResponseType};
use crate::network::Network;

pub const ORIGIN: &str = "http://app.test";

pub fn request(path: &str) -> Request {
  Request::get(Url::parse(&format!("{}{}", ORIGIN, path)).unwrap())
}

pub fn ok(body: &str) -> Response {
  Response::new(200, ResponseType::Basic).with_body(body.to_string())
}

/// Network double with scripted per-URL responses. Unscripted URLs fail as
/// if the connection were refused.
#[derive(Default)]
pub struct ScriptedNetwork {
  responses: Mutex<HashMap<String, Response>>,
  calls: AtomicUsize,
}

impl ScriptedNetwork {
  pub fn offline() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: Response) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn go_offline(&self) {
    self.responses.lock().unwrap().clear();
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self
      .responses
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned()
      .ok_or_else(|| eyre!("connection refused: {}", request.url))
  }
}
