//! The offline worker: lifecycle, fetch routing and control messages.

mod clients;
mod lifecycle;
mod message;
mod strategy;

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use url::Url;

use crate::cache::{CacheLayer, CacheResult, CacheStorage, Generation};
use crate::http::Request;
use crate::network::Network;

pub use clients::ClientHandle;
pub use lifecycle::WorkerState;
pub use message::WorkerMessage;
pub use strategy::{
  default_identity_providers, default_rules, default_static_extensions, Strategy, StrategyRule,
  StrategySelector,
};

use clients::Clients;
use lifecycle::Lifecycle;

/// Immutable settings a worker is built with.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  pub origin: Url,
  pub generation: Arc<Generation>,
  /// App shell fetched at install, already resolved against the origin
  pub precache: Vec<Url>,
  pub selector: StrategySelector,
}

/// One worker instance governing the pages behind the proxy.
pub struct ServiceWorker {
  config: Arc<WorkerConfig>,
  storage: Arc<dyn CacheStorage>,
  network: Arc<dyn Network>,
  layer: CacheLayer,
  clients: Clients,
  lifecycle: Mutex<Lifecycle>,
}

impl ServiceWorker {
  pub fn new(
    config: Arc<WorkerConfig>,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
  ) -> Self {
    let layer = CacheLayer::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      Arc::clone(&config.generation),
    );

    Self {
      config,
      storage,
      network,
      layer,
      clients: Clients::new(),
      lifecycle: Mutex::new(Lifecycle::default()),
    }
  }

  pub fn config(&self) -> &WorkerConfig {
    &self.config
  }

  fn lifecycle(&self) -> Result<MutexGuard<'_, Lifecycle>> {
    self
      .lifecycle
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  pub fn state(&self) -> Result<WorkerState> {
    Ok(self.lifecycle()?.state)
  }

  /// Handle one intercepted request.
  ///
  /// While active, GET requests are classified and run through exactly one
  /// strategy. Everything else is forwarded without touching the cache.
  pub async fn handle_fetch(&self, request: Request) -> CacheResult {
    let active = matches!(self.state(), Ok(WorkerState::Active));

    if !active || !request.is_retrieval() {
      return self.layer.forward(&request).await;
    }

    let strategy = self.config.selector.select(&request.url);
    self.layer.handle(strategy, request).await
  }

  /// Register a page. Pages opened while active are controlled at once.
  pub fn connect_client(&self) -> Result<ClientHandle> {
    let active = self.state()? == WorkerState::Active;
    self.clients.connect(active)
  }

  /// Open pages and how many are controlled.
  pub fn client_counts(&self) -> Result<(usize, usize)> {
    self.clients.counts()
  }

  /// Every partition in storage with its entry count and whether it belongs
  /// to the current generation.
  pub fn partitions(&self) -> Result<Vec<(String, usize, bool)>> {
    self
      .storage
      .partition_names()?
      .into_iter()
      .map(|name| -> Result<(String, usize, bool)> {
        let len = self.storage.len(&name)?;
        let current = self.config.generation.is_current(&name);
        Ok((name, len, current))
      })
      .collect()
  }
}
