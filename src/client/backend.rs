//! Durable storage backends for the client cache.
//!
//! Keys are opaque strings, values are serialized blobs, and every operation
//! may fail transiently - retrying is the caller's job, per the persisted
//! store's backoff policy.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Async string-keyed blob storage.
#[async_trait]
pub trait StorageBackend: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
  async fn set(&self, key: &str, value: &[u8]) -> Result<()>;
  async fn remove(&self, key: &str) -> Result<()>;
  async fn keys(&self) -> Result<Vec<String>>;
}

/// Schema for the single key-value namespace.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// SQLite-backed storage.
pub struct SqliteBackend {
  conn: Mutex<Connection>,
}

impl SqliteBackend {
  /// Open or create the database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(Self::default_path()?)
  }

  pub fn open(path: PathBuf) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open storage at {}: {}", path.display(), e))?;

    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run storage migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("embr").join("client.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT value FROM kv WHERE key = ?")
      .map_err(|e| eyre!("Failed to prepare read: {}", e))?;

    let value: Option<Vec<u8>> = stmt.query_row(params![key], |row| row.get(0)).ok();
    Ok(value)
  }

  async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write key '{}': {}", key, e))?;
    Ok(())
  }

  async fn remove(&self, key: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM kv WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove key '{}': {}", key, e))?;
    Ok(())
  }

  async fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT key FROM kv ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare key listing: {}", e))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys: {}", e))?
      .filter_map(|r| r.ok())
      .collect();
    Ok(keys)
  }
}

/// In-memory storage: used when no durable location exists, and as the test
/// double - `fail_next` makes the next N operations return errors so retry
/// paths can be exercised.
#[derive(Default)]
pub struct MemoryBackend {
  map: Mutex<HashMap<String, Vec<u8>>>,
  failures: AtomicUsize,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make the next `count` operations fail.
  pub fn fail_next(&self, count: usize) {
    self.failures.store(count, Ordering::SeqCst);
  }

  fn check_failure(&self) -> Result<()> {
    let remaining = self.failures.load(Ordering::SeqCst);
    if remaining > 0 {
      self.failures.store(remaining - 1, Ordering::SeqCst);
      return Err(eyre!("Injected storage failure"));
    }
    Ok(())
  }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    self.check_failure()?;
    Ok(self.map.lock().expect("map lock poisoned").get(key).cloned())
  }

  async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
    self.check_failure()?;
    self
      .map
      .lock()
      .expect("map lock poisoned")
      .insert(key.to_string(), value.to_vec());
    Ok(())
  }

  async fn remove(&self, key: &str) -> Result<()> {
    self.check_failure()?;
    self.map.lock().expect("map lock poisoned").remove(key);
    Ok(())
  }

  async fn keys(&self) -> Result<Vec<String>> {
    self.check_failure()?;
    Ok(
      self
        .map
        .lock()
        .expect("map lock poisoned")
        .keys()
        .cloned()
        .collect(),
    )
  }
}
