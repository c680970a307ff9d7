//! SQLite implementation of partition storage.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{CacheStorage, RequestKey, StoredResponse};
use crate::http::ResponseType;

/// SQLite-based partition storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Storage that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("biapo-offline").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_seq INTEGER NOT NULL
);

-- Stored response snapshots; seq orders entries by insertion
CREATE TABLE IF NOT EXISTS entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    response_type TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    seq INTEGER NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (partition, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_seq ON entries(partition, seq);
"#;

fn ensure_partition(tx: &Transaction<'_>, name: &str) -> Result<()> {
  tx.execute(
    "INSERT OR IGNORE INTO partitions (name, created_seq)
     VALUES (?, (SELECT COALESCE(MAX(created_seq), 0) + 1 FROM partitions))",
    params![name],
  )
  .map_err(|e| eyre!("Failed to create partition {}: {}", name, e))?;
  Ok(())
}

fn count_entries(tx: &Transaction<'_>, partition: &str) -> Result<usize> {
  let count: i64 = tx
    .query_row(
      "SELECT COUNT(*) FROM entries WHERE partition = ?",
      params![partition],
      |row| row.get(0),
    )
    .map_err(|e| eyre!("Failed to count entries in {}: {}", partition, e))?;
  Ok(count as usize)
}

impl CacheStorage for SqliteStorage {
  fn open_partition(&self, name: &str) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_partition(&tx, name)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY created_seq")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE partition = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn get(&self, partition: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, response_type, headers, body, stored_at FROM entries
         WHERE partition = ? AND key_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, String, Vec<u8>, String)> = stmt
      .query_row(params![partition, key.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read entry {} from {}: {}", key.url, partition, e))?;

    let Some((status, response_type, headers, body, stored_at)) = row else {
      return Ok(None);
    };

    let response_type = ResponseType::from_name(&response_type)
      .ok_or_else(|| eyre!("Unknown response type '{}' in {}", response_type, partition))?;
    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

    Ok(Some(StoredResponse {
      status,
      headers,
      body: body.into(),
      response_type,
      stored_at: parse_datetime(&stored_at)?,
    }))
  }

  fn put(
    &self,
    partition: &str,
    key: &RequestKey,
    response: &StoredResponse,
    limit: Option<usize>,
  ) -> Result<Vec<RequestKey>> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_partition(&tx, partition)?;

    let key_hash = key.cache_hash();
    let exists: bool = tx
      .query_row(
        "SELECT EXISTS(SELECT 1 FROM entries WHERE partition = ? AND key_hash = ?)",
        params![partition, key_hash],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to check entry: {}", e))?;

    // Make room for a new key by dropping the oldest entries
    let mut evicted = Vec::new();
    if let (false, Some(limit)) = (exists, limit) {
      while count_entries(&tx, partition)? >= limit.max(1) {
        let oldest: Option<(String, String, String)> = tx
          .query_row(
            "SELECT key_hash, method, url FROM entries
             WHERE partition = ? ORDER BY seq ASC LIMIT 1",
            params![partition],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
          )
          .optional()
          .map_err(|e| eyre!("Failed to find oldest entry: {}", e))?;

        let Some((oldest_hash, method, url)) = oldest else {
          break;
        };

        tx.execute(
          "DELETE FROM entries WHERE partition = ? AND key_hash = ?",
          params![partition, oldest_hash],
        )
        .map_err(|e| eyre!("Failed to evict entry: {}", e))?;
        evicted.push(RequestKey { method, url });
      }
    }

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    // A superseding write takes the newest position
    tx.execute(
      "INSERT OR REPLACE INTO entries
         (partition, key_hash, method, url, status, response_type, headers, body, seq, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM entries), ?)",
      params![
        partition,
        key_hash,
        key.method,
        key.url,
        response.status,
        response.response_type.as_str(),
        headers,
        response.body.as_ref(),
        response.stored_at.to_rfc3339(),
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key.url, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(evicted)
  }

  fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let removed = conn
      .execute(
        "DELETE FROM entries WHERE partition = ? AND key_hash = ?",
        params![partition, key.cache_hash()],
      )
      .map_err(|e| eyre!("Failed to delete entry: {}", e))?;

    Ok(removed > 0)
  }

  fn keys(&self, partition: &str) -> Result<Vec<RequestKey>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT method, url FROM entries WHERE partition = ? ORDER BY seq ASC")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![partition], |row| {
        Ok(RequestKey {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })
      .map_err(|e| eyre!("Failed to list keys of {}: {}", partition, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }

  fn len(&self, partition: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE partition = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries in {}: {}", partition, e))?;

    Ok(count as usize)
  }
}

/// Parse an RFC 3339 timestamp written by `put`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
