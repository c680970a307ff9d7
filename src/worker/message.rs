//! Control messages from pages, and background sync.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::clients::{ClientMessage, SyncAction};
use super::ServiceWorker;

/// Sync tag that makes the worker ask pages to sync their data.
pub const SYNC_TAG: &str = "background-sync";

/// Messages a page can post to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  SkipWaiting,
  CacheStatus,
  ClearCache,
  #[serde(other)]
  Unknown,
}

/// Replies sent back over the message's reply channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MessageReply {
  #[serde(rename_all = "camelCase")]
  CacheStatus {
    static_cache: String,
    dynamic_cache: String,
  },
  Cleared { success: bool },
}

impl ServiceWorker {
  /// Handle a control message. Unrecognized types are rejected.
  pub fn handle_message(&self, message: &WorkerMessage) -> Result<Option<MessageReply>> {
    match message {
      WorkerMessage::SkipWaiting => {
        self.skip_waiting()?;
        Ok(None)
      }
      WorkerMessage::CacheStatus => {
        let generation = &self.config.generation;
        Ok(Some(MessageReply::CacheStatus {
          static_cache: generation.static_name.clone(),
          dynamic_cache: generation.dynamic_name.clone(),
        }))
      }
      WorkerMessage::ClearCache => Ok(Some(MessageReply::Cleared {
        success: self.clear_dynamic(),
      })),
      WorkerMessage::Unknown => {
        warn!("rejected unrecognized message type");
        Err(eyre!("Unrecognized message type"))
      }
    }
  }

  /// Drop the whole dynamic partition, outside the normal eviction policy.
  pub fn clear_dynamic(&self) -> bool {
    let name = &self.config.generation.dynamic_name;
    match self.storage.delete_partition(name) {
      Ok(existed) => {
        info!(partition = %name, existed, "cleared dynamic cache");
        true
      }
      Err(e) => {
        warn!(partition = %name, error = %e, "failed to clear dynamic cache");
        false
      }
    }
  }

  /// Handle a background sync event. Returns how many pages were told to sync.
  ///
  /// The worker does no syncing of its own; it only signals the pages.
  pub fn handle_sync(&self, tag: &str) -> Result<usize> {
    if tag != SYNC_TAG {
      debug!(tag, "ignoring sync event");
      return Ok(0);
    }

    let notified = self.clients.post_all(&ClientMessage::BackgroundSync {
      action: SyncAction::SyncData,
    })?;
    info!(notified, "background sync requested");
    Ok(notified)
  }
}
