//! Core traits and types for the caching system.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

use crate::http::{Request, Response, ResponseType};

/// Identity of a cached request: method plus absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &str) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url: url.to_string(),
    }
  }

  pub fn for_request(request: &Request) -> Self {
    Self::new(&request.method, request.url.as_str())
  }

  /// Stable, fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Snapshot of a response at the moment it was written to a partition.
#[derive(Debug, Clone)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
  pub response_type: ResponseType,
  pub stored_at: DateTime<Utc>,
}

impl StoredResponse {
  pub fn snapshot(response: &Response) -> Self {
    Self {
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      response_type: response.response_type,
      stored_at: Utc::now(),
    }
  }

  pub fn into_response(self) -> Response {
    Response {
      status: self.status,
      headers: self.headers,
      body: self.body,
      response_type: self.response_type,
    }
  }
}

/// Trait for partition storage backends.
///
/// Partitions are independent namespaces. Reads from a partition that does
/// not exist behave like reads from an empty one.
pub trait CacheStorage: Send + Sync {
  /// Create the partition if it does not exist yet.
  fn open_partition(&self, name: &str) -> Result<()>;

  /// Names of every partition, in creation order.
  fn partition_names(&self) -> Result<Vec<String>>;

  /// Drop a partition and all its entries. Returns whether it existed.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  fn get(&self, partition: &str, key: &RequestKey) -> Result<Option<StoredResponse>>;

  /// Store `response` under `key`, replacing any previous entry for that key.
  ///
  /// With a `limit`, the oldest entries are evicted until a new key fits.
  /// Replacing an existing key never evicts. Returns the evicted keys.
  fn put(
    &self,
    partition: &str,
    key: &RequestKey,
    response: &StoredResponse,
    limit: Option<usize>,
  ) -> Result<Vec<RequestKey>>;

  fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool>;

  /// Keys in insertion order, oldest first.
  fn keys(&self, partition: &str) -> Result<Vec<RequestKey>>;

  fn len(&self, partition: &str) -> Result<usize>;
}

/// Result from a strategy, including the response and where it came from.
#[derive(Debug)]
pub struct CacheResult {
  /// The response handed back to the page
  pub response: Response,
  /// Where the response came from
  pub source: CacheSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
  /// Detached background revalidation, if one was started.
  /// Callers are free to drop this; dropping does not cancel the task.
  pub revalidation: Option<JoinHandle<()>>,
}

impl CacheResult {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      cached_at: None,
      revalidation: None,
    }
  }

  pub fn from_cache(stored: StoredResponse) -> Self {
    let cached_at = stored.stored_at;
    Self {
      response: stored.into_response(),
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
      revalidation: None,
    }
  }

  /// Cached data served because the network failed.
  pub fn offline(stored: StoredResponse) -> Self {
    Self {
      source: CacheSource::Offline,
      ..Self::from_cache(stored)
    }
  }

  pub fn fallback(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Fallback,
      cached_at: None,
      revalidation: None,
    }
  }

  pub fn with_revalidation(mut self, handle: JoinHandle<()>) -> Self {
    self.revalidation = Some(handle);
    self
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh from the network
  Network,
  /// Served from a partition without consulting the network first
  Cache,
  /// Network unavailable, serving cached data
  Offline,
  /// Neither cache nor network could answer; synthesized locally
  Fallback,
}
