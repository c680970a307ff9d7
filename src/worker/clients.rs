//! Open pages the worker can message.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Messages posted from the worker to its pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  BackgroundSync { action: SyncAction },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncAction {
  SyncData,
}

struct ClientEntry {
  tx: mpsc::UnboundedSender<ClientMessage>,
  controlled: bool,
}

#[derive(Default)]
struct Registry {
  next_id: u64,
  clients: BTreeMap<u64, ClientEntry>,
}

/// Registry of connected pages.
///
/// A page stays registered until its `ClientHandle` is dropped; closed pages
/// are pruned lazily on the next post.
#[derive(Default)]
pub struct Clients {
  registry: Mutex<Registry>,
}

/// A connected page's end of the channel.
pub struct ClientHandle {
  pub id: u64,
  rx: mpsc::UnboundedReceiver<ClientMessage>,
}

impl ClientHandle {
  /// Wait for the next message. `None` once the worker is gone.
  pub async fn recv(&mut self) -> Option<ClientMessage> {
    self.rx.recv().await
  }

  #[cfg(test)]
  pub fn try_recv(&mut self) -> Option<ClientMessage> {
    self.rx.try_recv().ok()
  }
}

impl Clients {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a page. `controlled` says whether the worker already governs it.
  pub fn connect(&self, controlled: bool) -> Result<ClientHandle> {
    let mut registry = self
      .registry
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let (tx, rx) = mpsc::unbounded_channel();
    registry.next_id += 1;
    let id = registry.next_id;
    registry.clients.insert(id, ClientEntry { tx, controlled });

    debug!(client = id, controlled, "client connected");
    Ok(ClientHandle { id, rx })
  }

  /// Take control of every open page. Returns how many were newly claimed.
  pub fn claim(&self) -> Result<usize> {
    let mut registry = self
      .registry
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    registry.clients.retain(|_, c| !c.tx.is_closed());
    let mut claimed = 0;
    for client in registry.clients.values_mut().filter(|c| !c.controlled) {
      client.controlled = true;
      claimed += 1;
    }
    Ok(claimed)
  }

  /// Post `message` to every open page. Returns how many received it.
  pub fn post_all(&self, message: &ClientMessage) -> Result<usize> {
    let mut registry = self
      .registry
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    registry
      .clients
      .retain(|_, c| c.tx.send(message.clone()).is_ok());
    Ok(registry.clients.len())
  }

  #[cfg(test)]
  pub(super) fn poison(&self) {
    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
      let _registry = self.registry.lock();
      panic!("registry poisoned");
    }));
  }

  /// Open pages and how many of them are controlled.
  pub fn counts(&self) -> Result<(usize, usize)> {
    let mut registry = self
      .registry
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    registry.clients.retain(|_, c| !c.tx.is_closed());
    let controlled = registry.clients.values().filter(|c| c.controlled).count();
    Ok((registry.clients.len(), controlled))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sync() -> ClientMessage {
    ClientMessage::BackgroundSync {
      action: SyncAction::SyncData,
    }
  }

  #[test]
  fn test_background_sync_wire_shape() {
    let json = serde_json::to_value(sync()).unwrap();
    assert_eq!(
      json,
      serde_json::json!({ "type": "BACKGROUND_SYNC", "action": "SYNC_DATA" })
    );
  }

  #[test]
  fn test_post_all_reaches_every_client() {
    let clients = Clients::new();
    let mut a = clients.connect(true).unwrap();
    let mut b = clients.connect(false).unwrap();

    assert_eq!(clients.post_all(&sync()).unwrap(), 2);
    assert_eq!(a.try_recv(), Some(sync()));
    assert_eq!(b.try_recv(), Some(sync()));
    assert_eq!(a.try_recv(), None);
  }

  #[test]
  fn test_closed_clients_are_pruned() {
    let clients = Clients::new();
    let _kept = clients.connect(true).unwrap();
    let gone = clients.connect(true).unwrap();
    drop(gone);

    assert_eq!(clients.post_all(&sync()).unwrap(), 1);
    assert_eq!(clients.counts().unwrap(), (1, 1));
  }

  #[test]
  fn test_claim_controls_all_open_pages() {
    let clients = Clients::new();
    let _a = clients.connect(false).unwrap();
    let _b = clients.connect(false).unwrap();
    let _c = clients.connect(true).unwrap();

    assert_eq!(clients.counts().unwrap(), (3, 1));
    assert_eq!(clients.claim().unwrap(), 2);
    assert_eq!(clients.counts().unwrap(), (3, 3));
    assert_eq!(clients.claim().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_recv_waits_for_message() {
    let clients = std::sync::Arc::new(Clients::new());
    let mut handle = clients.connect(true).unwrap();

    let poster = clients.clone();
    tokio::spawn(async move {
      poster.post_all(&sync()).unwrap();
    });

    assert_eq!(handle.recv().await, Some(sync()));
  }
}
