//! Install and activation.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::ServiceWorker;
use crate::cache::Partition;
use crate::http::Request;

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Populating the static partition
  Installing,
  /// Installed, not yet governing pages
  Waiting,
  /// Cleaning up old generations
  Activating,
  /// Governing pages; fetches go through the strategies
  Active,
  /// Replaced or shut down
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Installing => "installing",
      Self::Waiting => "waiting",
      Self::Activating => "activating",
      Self::Active => "active",
      Self::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

#[derive(Debug)]
pub(super) struct Lifecycle {
  pub state: WorkerState,
  /// Set once promotion past waiting has been requested
  pub skip_waiting: bool,
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self {
      state: WorkerState::Installing,
      skip_waiting: false,
    }
  }
}

/// Outcome of populating the static partition.
#[derive(Debug, Default)]
pub struct InstallReport {
  pub cached: Vec<Url>,
  pub failed: Vec<(Url, String)>,
}

#[derive(Debug, Default)]
pub struct ActivationReport {
  /// Old-generation partitions that were removed
  pub deleted: Vec<String>,
  /// Pages newly brought under control
  pub claimed: usize,
}

impl ServiceWorker {
  /// Fetch and store every manifest entry.
  ///
  /// Entries are fetched concurrently and settle independently: a failed
  /// entry is logged and reported, never fatal. Ends in the waiting state
  /// with promotion requested.
  pub async fn install(&self) -> Result<InstallReport> {
    {
      let lifecycle = self.lifecycle()?;
      if lifecycle.state != WorkerState::Installing {
        return Err(eyre!("Cannot install a worker that is {}", lifecycle.state));
      }
    }

    let name = &self.config.generation.static_name;
    let partition = match Partition::open(Arc::clone(&self.storage), name, None) {
      Ok(p) => Some(p),
      Err(e) => {
        warn!(partition = %name, error = %e, "failed to open static cache");
        None
      }
    };

    let fetches = self.config.precache.iter().map(|url| {
      let partition = partition.as_ref();
      async move {
        let request = Request::get(url.clone()).with_header("Cache-Control", "no-cache");
        let result = self.precache_one(partition, &request).await;
        (url.clone(), result)
      }
    });

    let mut report = InstallReport::default();
    for (url, result) in join_all(fetches).await {
      match result {
        Ok(()) => {
          debug!(%url, "precached");
          report.cached.push(url);
        }
        Err(e) => {
          warn!(%url, error = %e, "failed to precache");
          report.failed.push((url, e.to_string()));
        }
      }
    }

    {
      let mut lifecycle = self.lifecycle()?;
      lifecycle.state = WorkerState::Waiting;
      lifecycle.skip_waiting = true;
    }

    info!(
      partition = %name,
      cached = report.cached.len(),
      failed = report.failed.len(),
      "installed"
    );
    Ok(report)
  }

  async fn precache_one(&self, partition: Option<&Partition>, request: &Request) -> Result<()> {
    let partition = partition.ok_or_else(|| eyre!("Static cache unavailable"))?;
    let response = self.network.fetch(request).await?;

    if !response.is_cacheable() {
      return Err(eyre!(
        "Unexpected {} {} response",
        response.status,
        response.response_type.as_str()
      ));
    }

    partition.put(request, &response)?;
    Ok(())
  }

  /// Remove old generations and take control of open pages.
  ///
  /// Only partitions carrying the application prefix are considered;
  /// anything else in storage is left alone.
  pub fn activate(&self) -> Result<ActivationReport> {
    {
      let mut lifecycle = self.lifecycle()?;
      if lifecycle.state != WorkerState::Waiting {
        return Err(eyre!("Cannot activate a worker that is {}", lifecycle.state));
      }
      lifecycle.state = WorkerState::Activating;
    }

    let mut report = ActivationReport::default();
    let generation = &self.config.generation;

    match self.storage.partition_names() {
      Ok(names) => {
        for name in names.into_iter().filter(|n| generation.is_stale(n)) {
          match self.storage.delete_partition(&name) {
            Ok(_) => {
              info!(partition = %name, "deleted old cache");
              report.deleted.push(name);
            }
            Err(e) => warn!(partition = %name, error = %e, "failed to delete old cache"),
          }
        }
      }
      Err(e) => warn!(error = %e, "failed to list caches"),
    }

    report.claimed = match self.clients.claim() {
      Ok(claimed) => claimed,
      Err(e) => {
        // Back to waiting so a later skip-waiting can retry.
        self.lifecycle()?.state = WorkerState::Waiting;
        return Err(e);
      }
    };

    {
      let mut lifecycle = self.lifecycle()?;
      lifecycle.state = WorkerState::Active;
      lifecycle.skip_waiting = false;
    }

    info!(
      deleted = report.deleted.len(),
      claimed = report.claimed,
      "activated"
    );
    Ok(report)
  }

  /// Request promotion past waiting. Activates right away when waiting;
  /// otherwise the request is remembered or moot.
  pub fn skip_waiting(&self) -> Result<Option<ActivationReport>> {
    let state = {
      let mut lifecycle = self.lifecycle()?;
      lifecycle.skip_waiting = true;
      lifecycle.state
    };

    match state {
      WorkerState::Waiting => self.activate().map(Some),
      other => {
        debug!(state = %other, "skip-waiting has nothing to promote");
        Ok(None)
      }
    }
  }

  /// Install, then activate if promotion was requested.
  pub async fn start(&self) -> Result<(InstallReport, Option<ActivationReport>)> {
    let install = self.install().await?;
    let requested = self.lifecycle()?.skip_waiting;
    let activation = if requested {
      Some(self.activate()?)
    } else {
      None
    };
    Ok((install, activation))
  }

  /// Stop governing pages.
  pub fn retire(&self) -> Result<()> {
    let mut lifecycle = self.lifecycle()?;
    lifecycle.state = WorkerState::Redundant;
    info!("worker retired");
    Ok(())
  }
}
