//! Cache layer that runs the caching strategies against the network.

use std::sync::Arc;
use tracing::{debug, warn};

use super::fallback;
use super::partition::{Generation, Partition};
use super::traits::{CacheResult, CacheStorage, StoredResponse};
use crate::http::{Request, Response};
use crate::network::Network;
use crate::worker::Strategy;

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between intercepted page requests and the network,
/// providing the five request strategies over the current generation's
/// partitions. Storage failures never fail a request: they are logged and
/// the request continues as if no cache were available.
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  network: Arc<dyn Network>,
  generation: Arc<Generation>,
}

impl CacheLayer {
  pub fn new(
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    generation: Arc<Generation>,
  ) -> Self {
    Self {
      storage,
      network,
      generation,
    }
  }

  /// Run `request` through the named strategy.
  pub async fn handle(&self, strategy: Strategy, request: Request) -> CacheResult {
    debug!(%strategy, url = %request.url, "handling fetch");
    match strategy {
      Strategy::CacheFirst => self.cache_first(&request).await,
      Strategy::NetworkFirst => self.network_first(&request).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
      Strategy::CacheOnly => self.cache_only(&request).await,
      Strategy::NetworkOnly => self.network_only(&request).await,
    }
  }

  /// Cache-first.
  ///
  /// 1. Serve from cache when present
  /// 2. Otherwise fetch, storing an eligible copy
  /// 3. With neither, a bare 503
  pub async fn cache_first(&self, request: &Request) -> CacheResult {
    if let Some(cached) = self.lookup(request).await {
      return CacheResult::from_cache(cached);
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store(request, &response).await;
        CacheResult::from_network(response)
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "network failed with nothing cached");
        CacheResult::fallback(fallback::service_unavailable())
      }
    }
  }

  /// Network-first.
  ///
  /// HTTP error statuses are returned as they are; only a failed fetch falls
  /// back to the cache and then to the offline response.
  pub async fn network_first(&self, request: &Request) -> CacheResult {
    match self.network.fetch(request).await {
      Ok(response) => {
        self.store(request, &response).await;
        CacheResult::from_network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed, trying cache");
        match self.lookup(request).await {
          Some(cached) => CacheResult::offline(cached),
          None => CacheResult::fallback(fallback::offline_response(request)),
        }
      }
    }
  }

  /// Stale-while-revalidate.
  ///
  /// Exactly one network fetch is made. With a cached entry it runs as a
  /// detached task whose failures are logged and go nowhere else; without
  /// one, the caller waits for it.
  pub async fn stale_while_revalidate(&self, request: Request) -> CacheResult {
    if let Some(cached) = self.lookup(&request).await {
      let layer = self.clone();
      let handle = tokio::spawn(async move { layer.revalidate(request).await });
      return CacheResult::from_cache(cached).with_revalidation(handle);
    }

    match self.network.fetch(&request).await {
      Ok(response) => {
        self.store(&request, &response).await;
        CacheResult::from_network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed with nothing cached");
        CacheResult::fallback(fallback::offline_response(&request))
      }
    }
  }

  /// Cache-only. Never touches the network.
  pub async fn cache_only(&self, request: &Request) -> CacheResult {
    match self.lookup(request).await {
      Some(cached) => CacheResult::from_cache(cached),
      None => CacheResult::fallback(fallback::offline_response(request)),
    }
  }

  /// Network-only. Never touches the cache.
  pub async fn network_only(&self, request: &Request) -> CacheResult {
    match self.network.fetch(request).await {
      Ok(response) => CacheResult::from_network(response),
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed");
        CacheResult::fallback(fallback::offline_response(request))
      }
    }
  }

  /// Plain forwarding for requests the worker does not govern. No cache,
  /// and a failed fetch is a bare 503 rather than an offline page.
  pub async fn forward(&self, request: &Request) -> CacheResult {
    match self.network.fetch(request).await {
      Ok(response) => CacheResult::from_network(response),
      Err(e) => {
        warn!(method = %request.method, url = %request.url, error = %e, "forwarding failed");
        CacheResult::fallback(fallback::service_unavailable())
      }
    }
  }

  /// Background half of stale-while-revalidate.
  async fn revalidate(&self, request: Request) {
    match self.network.fetch(&request).await {
      Ok(response) => {
        self.store(&request, &response).await;
        debug!(url = %request.url, status = response.status, "revalidated");
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "background revalidation failed");
      }
    }
  }

  fn open(&self, name: &str, limit: Option<usize>) -> Option<Partition> {
    match Partition::open(Arc::clone(&self.storage), name, limit) {
      Ok(partition) => Some(partition),
      Err(e) => {
        warn!(partition = name, error = %e, "failed to open cache, continuing without it");
        None
      }
    }
  }

  /// Look the request up in the static partition, then the dynamic one.
  ///
  /// SQLite work runs on the blocking pool. A partition that does not exist
  /// yet is a miss and is not created.
  async fn lookup(&self, request: &Request) -> Option<StoredResponse> {
    let layer = self.clone();
    let request = request.clone();
    match tokio::task::spawn_blocking(move || layer.lookup_blocking(&request)).await {
      Ok(hit) => hit,
      Err(e) => {
        warn!(error = %e, "cache lookup task failed");
        None
      }
    }
  }

  fn lookup_blocking(&self, request: &Request) -> Option<StoredResponse> {
    for name in [&self.generation.static_name, &self.generation.dynamic_name] {
      let partition = Partition::attach(Arc::clone(&self.storage), name, None);
      match partition.match_request(request) {
        Ok(Some(hit)) => {
          debug!(partition = %name, url = %request.url, "cache hit");
          return Some(hit);
        }
        Ok(None) => {}
        Err(e) => warn!(partition = %name, error = %e, "cache read failed"),
      }
    }
    None
  }

  /// Write an eligible copy into the dynamic partition. Failures are logged
  /// and never reach the response path.
  async fn store(&self, request: &Request, response: &Response) {
    let layer = self.clone();
    let request = request.clone();
    let response = response.clone();
    if let Err(e) =
      tokio::task::spawn_blocking(move || layer.store_blocking(&request, &response)).await
    {
      warn!(error = %e, "cache write task failed");
    }
  }

  fn store_blocking(&self, request: &Request, response: &Response) {
    let Some(partition) = self.open(
      &self.generation.dynamic_name,
      Some(self.generation.dynamic_limit),
    ) else {
      return;
    };

    if let Err(e) = partition.put(request, response) {
      warn!(partition = partition.name(), url = %request.url, error = %e, "cache write failed");
    }
  }
}

impl Clone for CacheLayer {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      generation: Arc::clone(&self.generation),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::{CacheSource, RequestKey};
  use crate::cache::SqliteStorage;
  use crate::http::ResponseType;
  use crate::testing::{ok, request, ScriptedNetwork, ORIGIN};
  use color_eyre::{eyre::eyre, Result};

  /// Storage whose every operation fails, e.g. a quota or disk error.
  struct BrokenStorage;

  impl CacheStorage for BrokenStorage {
    fn open_partition(&self, _name: &str) -> Result<()> {
      Err(eyre!("disk I/O error"))
    }
    fn partition_names(&self) -> Result<Vec<String>> {
      Err(eyre!("disk I/O error"))
    }
    fn delete_partition(&self, _name: &str) -> Result<bool> {
      Err(eyre!("disk I/O error"))
    }
    fn get(&self, _partition: &str, _key: &RequestKey) -> Result<Option<StoredResponse>> {
      Err(eyre!("disk I/O error"))
    }
    fn put(
      &self,
      _partition: &str,
      _key: &RequestKey,
      _response: &StoredResponse,
      _limit: Option<usize>,
    ) -> Result<Vec<RequestKey>> {
      Err(eyre!("quota exceeded"))
    }
    fn delete(&self, _partition: &str, _key: &RequestKey) -> Result<bool> {
      Err(eyre!("disk I/O error"))
    }
    fn keys(&self, _partition: &str) -> Result<Vec<RequestKey>> {
      Err(eyre!("disk I/O error"))
    }
    fn len(&self, _partition: &str) -> Result<usize> {
      Err(eyre!("disk I/O error"))
    }
  }

  struct Fixture {
    layer: CacheLayer,
    storage: Arc<SqliteStorage>,
    network: Arc<ScriptedNetwork>,
    generation: Arc<Generation>,
  }

  impl Fixture {
    fn new() -> Self {
      let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
      let network = Arc::new(ScriptedNetwork::offline());
      let generation = Arc::new(Generation::new("biapo", "v1", 3));
      let layer = CacheLayer::new(storage.clone(), network.clone(), generation.clone());
      Self {
        layer,
        storage,
        network,
        generation,
      }
    }

    fn seed_dynamic(&self, path: &str, body: &str) {
      let storage: Arc<dyn CacheStorage> = self.storage.clone();
      Partition::open(storage, &self.generation.dynamic_name, None)
        .unwrap()
        .put(&request(path), &ok(body))
        .unwrap();
    }

    fn seed_static(&self, path: &str, body: &str) {
      let storage: Arc<dyn CacheStorage> = self.storage.clone();
      Partition::open(storage, &self.generation.static_name, None)
        .unwrap()
        .put(&request(path), &ok(body))
        .unwrap();
    }

    fn cached_body(&self, path: &str) -> Option<String> {
      self
        .storage
        .get(
          &self.generation.dynamic_name,
          &RequestKey::for_request(&request(path)),
        )
        .unwrap()
        .map(|s| String::from_utf8(s.body.to_vec()).unwrap())
    }

    fn url(path: &str) -> String {
      format!("{}{}", ORIGIN, path)
    }
  }

  #[tokio::test]
  async fn test_cache_first_serves_cache_without_network() {
    let fx = Fixture::new();
    fx.seed_static("/css/app.css", "cached");

    let result = fx.layer.cache_first(&request("/css/app.css")).await;

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.response.body.as_ref(), b"cached");
    assert!(result.cached_at.is_some());
    assert_eq!(fx.network.calls(), 0);
  }

  #[tokio::test]
  async fn test_cache_first_stores_network_copy() {
    let fx = Fixture::new();
    fx.network.respond(&Fixture::url("/js/app.js"), ok("fresh"));

    let result = fx.layer.cache_first(&request("/js/app.js")).await;

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(fx.cached_body("/js/app.js").as_deref(), Some("fresh"));
  }

  #[tokio::test]
  async fn test_cache_first_total_failure_is_503() {
    let fx = Fixture::new();

    let result = fx.layer.cache_first(&request("/js/app.js")).await;

    assert_eq!(result.source, CacheSource::Fallback);
    assert_eq!(result.response.status, 503);
  }

  #[tokio::test]
  async fn test_network_first_prefers_network_and_stores() {
    let fx = Fixture::new();
    fx.seed_dynamic("/api/tasks", "old");
    fx.network.respond(&Fixture::url("/api/tasks"), ok("new"));

    let result = fx.layer.network_first(&request("/api/tasks")).await;

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.response.body.as_ref(), b"new");
    assert_eq!(fx.cached_body("/api/tasks").as_deref(), Some("new"));
  }

  #[tokio::test]
  async fn test_network_first_returns_http_errors_without_caching() {
    let fx = Fixture::new();
    fx.seed_dynamic("/api/tasks", "old");
    fx.network.respond(
      &Fixture::url("/api/tasks"),
      Response::new(500, ResponseType::Basic),
    );

    let result = fx.layer.network_first(&request("/api/tasks")).await;

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.response.status, 500);
    assert_eq!(fx.cached_body("/api/tasks").as_deref(), Some("old"));
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_cache_then_offline() {
    let fx = Fixture::new();
    fx.seed_dynamic("/api/tasks", "old");

    let cached = fx.layer.network_first(&request("/api/tasks")).await;
    assert_eq!(cached.source, CacheSource::Offline);
    assert_eq!(cached.response.body.as_ref(), b"old");

    let missing = fx.layer.network_first(&request("/api/events.json")).await;
    assert_eq!(missing.source, CacheSource::Fallback);
    let body: serde_json::Value = serde_json::from_slice(&missing.response.body).unwrap();
    assert_eq!(body["error"], "Offline");
  }

  #[tokio::test]
  async fn test_network_first_does_not_cache_cross_origin() {
    let fx = Fixture::new();
    fx.network.respond(
      &Fixture::url("/api/tasks"),
      Response::new(200, ResponseType::Cors),
    );

    fx.layer.network_first(&request("/api/tasks")).await;

    assert_eq!(fx.cached_body("/api/tasks"), None);
  }

  #[tokio::test]
  async fn test_swr_returns_cache_and_revalidates_once() {
    let fx = Fixture::new();
    fx.seed_dynamic("/fonts/inter.css", "stale");
    fx.network.respond(&Fixture::url("/fonts/inter.css"), ok("fresh"));

    let result = fx
      .layer
      .stale_while_revalidate(request("/fonts/inter.css"))
      .await;

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.response.body.as_ref(), b"stale");

    result.revalidation.unwrap().await.unwrap();
    assert_eq!(fx.network.calls(), 1);
    assert_eq!(fx.cached_body("/fonts/inter.css").as_deref(), Some("fresh"));
  }

  #[tokio::test]
  async fn test_swr_background_failure_is_swallowed() {
    let fx = Fixture::new();
    fx.seed_dynamic("/fonts/inter.css", "stale");

    let result = fx
      .layer
      .stale_while_revalidate(request("/fonts/inter.css"))
      .await;

    assert_eq!(result.response.body.as_ref(), b"stale");
    // The detached task completes normally even though its fetch failed
    assert!(result.revalidation.unwrap().await.is_ok());
    assert_eq!(fx.network.calls(), 1);
    assert_eq!(fx.cached_body("/fonts/inter.css").as_deref(), Some("stale"));
  }

  #[tokio::test]
  async fn test_swr_without_cache_awaits_network() {
    let fx = Fixture::new();
    fx.network.respond(&Fixture::url("/lib.js"), ok("lib"));

    let result = fx.layer.stale_while_revalidate(request("/lib.js")).await;

    assert_eq!(result.source, CacheSource::Network);
    assert!(result.revalidation.is_none());
    assert_eq!(fx.network.calls(), 1);
    assert_eq!(fx.cached_body("/lib.js").as_deref(), Some("lib"));

    fx.network.go_offline();
    let missing = fx.layer.stale_while_revalidate(request("/other/")).await;
    assert_eq!(missing.source, CacheSource::Fallback);
    assert_eq!(missing.response.status, 200);
  }

  #[tokio::test]
  async fn test_cache_only_never_fetches() {
    let fx = Fixture::new();
    fx.seed_static("/offline.html", "page");
    fx.network.respond(&Fixture::url("/missing.png"), ok("x"));

    let hit = fx.layer.cache_only(&request("/offline.html")).await;
    let miss = fx.layer.cache_only(&request("/missing.png")).await;

    assert_eq!(hit.source, CacheSource::Cache);
    assert_eq!(miss.source, CacheSource::Fallback);
    assert_eq!(miss.response.status, 503);
    assert_eq!(fx.network.calls(), 0);
  }

  #[tokio::test]
  async fn test_lookups_leave_storage_untouched() {
    let fx = Fixture::new();

    let miss = fx.layer.cache_only(&request("/missing.png")).await;

    assert_eq!(miss.source, CacheSource::Fallback);
    assert!(fx.storage.partition_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_network_only_never_caches() {
    let fx = Fixture::new();
    fx.seed_dynamic("/sw-version", "cached");
    fx.network.respond(&Fixture::url("/sw-version"), ok("live"));

    let live = fx.layer.network_only(&request("/sw-version")).await;
    assert_eq!(live.response.body.as_ref(), b"live");
    assert_eq!(fx.cached_body("/sw-version").as_deref(), Some("cached"));

    fx.network.go_offline();
    let offline = fx.layer.network_only(&request("/sw-version")).await;
    assert_eq!(offline.source, CacheSource::Fallback);
  }

  #[tokio::test]
  async fn test_dynamic_partition_stays_at_cap() {
    let fx = Fixture::new();
    for path in ["/api/1", "/api/2", "/api/3", "/api/4"] {
      fx.network.respond(&Fixture::url(path), ok(path));
      fx.layer.network_first(&request(path)).await;
    }

    assert_eq!(fx.storage.len(&fx.generation.dynamic_name).unwrap(), 3);
    assert_eq!(fx.cached_body("/api/1"), None);
    assert_eq!(fx.cached_body("/api/4").as_deref(), Some("/api/4"));
  }

  #[tokio::test]
  async fn test_storage_failures_degrade_to_network() {
    let network = Arc::new(ScriptedNetwork::offline());
    network.respond(&Fixture::url("/api/tasks"), ok("live"));
    let layer = CacheLayer::new(
      Arc::new(BrokenStorage),
      network.clone(),
      Arc::new(Generation::new("biapo", "v1", 3)),
    );

    let result = layer.network_first(&request("/api/tasks")).await;
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.response.body.as_ref(), b"live");

    let cached = layer.cache_first(&request("/api/tasks")).await;
    assert_eq!(cached.source, CacheSource::Network);

    network.go_offline();
    let offline = layer.network_first(&request("/")).await;
    assert_eq!(offline.source, CacheSource::Fallback);
  }

  #[tokio::test]
  async fn test_handle_dispatches_by_strategy() {
    let fx = Fixture::new();
    fx.seed_static("/app.js", "cached");
    fx.network.respond(&Fixture::url("/app.js"), ok("live"));

    let first = fx.layer.handle(Strategy::CacheFirst, request("/app.js")).await;
    let network = fx.layer.handle(Strategy::NetworkOnly, request("/app.js")).await;

    assert_eq!(first.response.body.as_ref(), b"cached");
    assert_eq!(network.response.body.as_ref(), b"live");
  }
}
