//! Durable storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::error::StorageError;

/// Default durable tier quota, in bytes.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Trait for durable key/value backends.
///
/// Values are JSON strings. Every method may fail; callers treat failures as
/// "proceed without the durable tier".
pub trait DurableStorage: Send + Sync {
  /// Get the value stored under `key`.
  fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

  /// Store `value` under `key`, replacing any previous value.
  fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

  /// Remove `key`. Removing a missing key is not an error.
  fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

impl<S: DurableStorage + ?Sized> DurableStorage for Arc<S> {
  fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
    (**self).get_item(key)
  }

  fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
    (**self).set_item(key, value)
  }

  fn remove_item(&self, key: &str) -> Result<(), StorageError> {
    (**self).remove_item(key)
  }
}

/// Storage used when persistence is turned off.
/// Every operation fails, so the cache runs on its volatile tier only.
pub struct DisabledStorage;

impl DurableStorage for DisabledStorage {
  fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
    Err(StorageError::Unavailable("storage disabled".to_string()))
  }

  fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
    Err(StorageError::Unavailable("storage disabled".to_string()))
  }

  fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
    Err(StorageError::Unavailable("storage disabled".to_string()))
  }
}

/// SQLite-based durable storage.
///
/// Several processes or application instances may open the same file; the
/// table is a flat key/value map.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  quota: Option<usize>,
}

impl SqliteStorage {
  /// Open (or create) storage at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;
    conn
      .busy_timeout(Duration::from_secs(5))
      .map_err(|e| eyre!("Failed to configure cache database: {}", e))?;

    Self::with_connection(conn)
  }

  /// Open storage at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  /// Limit the total size of stored keys and values.
  pub fn with_quota(mut self, bytes: usize) -> Self {
    self.quota = Some(bytes);
    self
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("localcache").join("cache.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(STORAGE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
      quota: None,
    })
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
    self
      .conn
      .lock()
      .map_err(|e| StorageError::Backend(format!("Lock poisoned: {}", e)))
  }
}

/// Schema for the key/value table.
const STORAGE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl DurableStorage for SqliteStorage {
  fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
    let conn = self.conn()?;
    let value = conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let conn = self.conn()?;

    if let Some(quota) = self.quota {
      let used: i64 = conn.query_row(
        "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
         FROM kv_store WHERE key != ?",
        params![key],
        |row| row.get(0),
      )?;
      let needed = used.max(0) as usize + key.len() + value.len();
      if needed > quota {
        return Err(StorageError::QuotaExceeded { needed, quota });
      }
    }

    conn.execute(
      "INSERT OR REPLACE INTO kv_store (key, value, updated_at)
       VALUES (?, ?, datetime('now'))",
      params![key, value],
    )?;
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<(), StorageError> {
    let conn = self.conn()?;
    conn.execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
    Ok(())
  }
}
