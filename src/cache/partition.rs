//! Named partitions and the generation that owns them.

use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;

use super::traits::{CacheStorage, RequestKey, StoredResponse};
use crate::http::{Request, Response};

/// The pair of partition names belonging to one worker version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
  pub prefix: String,
  pub static_name: String,
  pub dynamic_name: String,
  /// Entry cap of the dynamic partition
  pub dynamic_limit: usize,
}

impl Generation {
  pub fn new(prefix: &str, version: &str, dynamic_limit: usize) -> Self {
    Self {
      prefix: prefix.to_string(),
      static_name: format!("{}-static-{}", prefix, version),
      dynamic_name: format!("{}-dynamic-{}", prefix, version),
      dynamic_limit,
    }
  }

  /// Whether `name` belongs to this application at all.
  pub fn owns(&self, name: &str) -> bool {
    name
      .strip_prefix(self.prefix.as_str())
      .is_some_and(|rest| rest.starts_with('-'))
  }

  pub fn is_current(&self, name: &str) -> bool {
    name == self.static_name || name == self.dynamic_name
  }

  /// An application partition left behind by an older generation.
  pub fn is_stale(&self, name: &str) -> bool {
    self.owns(name) && !self.is_current(name)
  }
}

/// Handle to one opened partition.
#[derive(Clone)]
pub struct Partition {
  name: String,
  storage: Arc<dyn CacheStorage>,
  limit: Option<usize>,
}

impl Partition {
  /// Open (creating if needed) the partition called `name`.
  pub fn open(storage: Arc<dyn CacheStorage>, name: &str, limit: Option<usize>) -> Result<Self> {
    storage.open_partition(name)?;
    Ok(Self::attach(storage, name, limit))
  }

  /// Handle to `name` without creating it. Reads from a partition that does
  /// not exist find nothing.
  pub fn attach(storage: Arc<dyn CacheStorage>, name: &str, limit: Option<usize>) -> Self {
    Self {
      name: name.to_string(),
      storage,
      limit,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn match_request(&self, request: &Request) -> Result<Option<StoredResponse>> {
    if !request.is_retrieval() {
      return Ok(None);
    }
    self.storage.get(&self.name, &RequestKey::for_request(request))
  }

  /// Store a snapshot of `response` for `request`.
  ///
  /// Returns `false` without touching storage when the pair is not
  /// eligible: non-GET requests, and responses other than basic 200s.
  pub fn put(&self, request: &Request, response: &Response) -> Result<bool> {
    if !request.is_retrieval() || !response.is_cacheable() {
      debug!(
        partition = %self.name,
        url = %request.url,
        status = response.status,
        "skipping ineligible response"
      );
      return Ok(false);
    }

    let key = RequestKey::for_request(request);
    let evicted = self
      .storage
      .put(&self.name, &key, &StoredResponse::snapshot(response), self.limit)?;

    for old in &evicted {
      debug!(partition = %self.name, url = %old.url, "evicted oldest entry");
    }

    Ok(true)
  }

  #[cfg(test)]
  pub fn keys(&self) -> Result<Vec<RequestKey>> {
    self.storage.keys(&self.name)
  }

  #[cfg(test)]
  pub fn len(&self) -> Result<usize> {
    self.storage.len(&self.name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::http::ResponseType;
  use url::Url;

  fn request(path: &str) -> Request {
    Request::get(Url::parse(&format!("http://app.test{}", path)).unwrap())
  }

  fn ok() -> Response {
    Response::new(200, ResponseType::Basic).with_body("ok")
  }

  fn dynamic(limit: usize) -> Partition {
    let storage: Arc<dyn CacheStorage> = Arc::new(SqliteStorage::open_in_memory().unwrap());
    Partition::open(storage, "biapo-dynamic-v1", Some(limit)).unwrap()
  }

  #[test]
  fn test_generation_names() {
    let generation = Generation::new("biapo", "v1.0.0", 50);
    assert_eq!(generation.static_name, "biapo-static-v1.0.0");
    assert_eq!(generation.dynamic_name, "biapo-dynamic-v1.0.0");
  }

  #[test]
  fn test_generation_stale_detection() {
    let generation = Generation::new("biapo", "v2", 50);
    assert!(generation.is_stale("biapo-static-v1"));
    assert!(generation.is_stale("biapo-dynamic-v1"));
    assert!(!generation.is_stale("biapo-static-v2"));
    assert!(!generation.is_stale("biapo-dynamic-v2"));
    assert!(!generation.is_stale("other-app-cache"));
    assert!(!generation.is_stale("biapoextra-static-v1"));
  }

  #[test]
  fn test_full_partition_evicts_exactly_oldest() {
    let partition = dynamic(3);
    for path in ["/a", "/b", "/c"] {
      assert!(partition.put(&request(path), &ok()).unwrap());
    }

    partition.put(&request("/d"), &ok()).unwrap();

    assert_eq!(partition.len().unwrap(), 3);
    let urls: Vec<String> = partition.keys().unwrap().into_iter().map(|k| k.url).collect();
    assert_eq!(
      urls,
      vec!["http://app.test/b", "http://app.test/c", "http://app.test/d"]
    );
  }

  #[test]
  fn test_ineligible_responses_leave_partition_unchanged() {
    let partition = dynamic(10);
    partition.put(&request("/kept"), &ok()).unwrap();

    let not_found = Response::new(404, ResponseType::Basic);
    let cross_origin = Response::new(200, ResponseType::Cors);
    let opaque = Response::new(200, ResponseType::Opaque);
    let redirect = Response::new(302, ResponseType::Basic);
    for response in [not_found, cross_origin, opaque, redirect] {
      assert!(!partition.put(&request("/other"), &response).unwrap());
    }

    let mut post = request("/kept");
    post.method = "POST".to_string();
    assert!(!partition.put(&post, &ok()).unwrap());

    assert_eq!(partition.len().unwrap(), 1);
    assert!(partition.match_request(&request("/other")).unwrap().is_none());
  }

  #[test]
  fn test_match_ignores_non_retrieval() {
    let partition = dynamic(10);
    partition.put(&request("/x"), &ok()).unwrap();

    let mut head = request("/x");
    head.method = "DELETE".to_string();
    assert!(partition.match_request(&head).unwrap().is_none());
    assert!(partition.match_request(&request("/x")).unwrap().is_some());
  }
}
