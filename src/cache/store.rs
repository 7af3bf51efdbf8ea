//! Two-tier cache store: a volatile in-process map in front of durable
//! key/value storage.
//!
//! Keys are namespaced as `<app>#<resource>`. A key index stored under
//! `<app>:keys` maps every durable key to its expiration timestamp so an
//! application can drop all of its entries without scanning storage.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::error::StorageError;
use super::policy::Expiry;
use super::storage::DurableStorage;

/// Key index contents: durable key to expiration timestamp.
type KeyIndex = BTreeMap<String, Option<i64>>;

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
  Utc::now().timestamp_millis()
}

/// A cached payload with its expiration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub resource: String,
  /// Expiration in epoch millis; `None` never expires.
  #[serde(rename = "_ts")]
  pub timestamp: Option<i64>,
  #[serde(rename = "resp")]
  pub payload: Value,
}

impl CacheEntry {
  pub fn is_expired(&self) -> bool {
    self.is_expired_at(now_millis())
  }

  pub fn is_expired_at(&self, now: i64) -> bool {
    self.timestamp.is_some_and(|ts| now > ts)
  }
}

/// Where a write landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
  /// Written to both tiers.
  Durable,
  /// The durable write failed; only the volatile tier holds the entry.
  VolatileOnly,
}

pub struct CacheStore<D: DurableStorage> {
  namespace: String,
  durable: D,
  memory: Mutex<HashMap<String, CacheEntry>>,
}

impl<D: DurableStorage> CacheStore<D> {
  /// Create a store whose keys are scoped to `namespace` (the application name).
  pub fn new(namespace: impl Into<String>, durable: D) -> Self {
    Self {
      namespace: namespace.into(),
      durable,
      memory: Mutex::new(HashMap::new()),
    }
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  /// Durable key for a resource.
  pub fn key(&self, resource: &str) -> String {
    format!("{}#{}", self.namespace, resource)
  }

  fn index_key(&self) -> String {
    format!("{}:keys", self.namespace)
  }

  fn memory(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    self.memory.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Look up a resource, volatile tier first.
  ///
  /// A durable hit is promoted into the volatile tier. An expired entry is
  /// cleared from both tiers and reported as absent.
  pub fn get(&self, resource: &str) -> Option<CacheEntry> {
    let now = now_millis();

    let cached = self.memory().get(resource).cloned();
    if let Some(entry) = cached {
      if !entry.is_expired_at(now) {
        debug!(resource, tier = "memory", "cache hit");
        return Some(entry);
      }
      debug!(resource, "cache entry expired");
      self.clear(resource);
      return None;
    }

    let entry = self.read_durable(resource)?;
    if entry.is_expired_at(now) {
      debug!(resource, "cache entry expired");
      self.clear(resource);
      return None;
    }

    debug!(resource, tier = "durable", "cache hit");
    self
      .memory()
      .insert(resource.to_string(), entry.clone());
    Some(entry)
  }

  /// Store a payload for a resource.
  ///
  /// The durable write comes first; if it fails the store falls back to the
  /// volatile tier and logs a warning. This never fails from the caller's
  /// point of view.
  pub fn set(&self, resource: &str, payload: Value, expire: Expiry) -> WriteOutcome {
    let entry = CacheEntry {
      resource: resource.to_string(),
      timestamp: expire.deadline(now_millis()),
      payload,
    };

    let outcome = match self.write_durable(&entry) {
      Ok(()) => WriteOutcome::Durable,
      Err(e) => {
        warn!(resource, error = %e, "durable cache write failed, keeping entry in memory only");
        WriteOutcome::VolatileOnly
      }
    };

    self.memory().insert(resource.to_string(), entry);
    outcome
  }

  /// Remove a resource from both tiers and from the key index.
  pub fn clear(&self, resource: &str) {
    let key = self.key(resource);
    self.memory().remove(resource);

    let had_entry = match self.durable.get_item(&key) {
      Ok(value) => value.is_some(),
      Err(e) => {
        warn!(resource, error = %e, "durable storage unavailable while clearing");
        return;
      }
    };
    if had_entry {
      if let Err(e) = self.durable.remove_item(&key) {
        warn!(resource, key = %key, error = %e, "failed to remove durable cache entry");
      }
    }

    let (_, mut index) = match self.read_index() {
      Ok(index) => index,
      Err(e) => {
        warn!(resource, error = %e, "failed to read cache key index");
        return;
      }
    };
    let had_record = index.remove(&key).is_some();
    if had_record {
      if let Err(e) = self.write_index(&index) {
        warn!(resource, error = %e, "failed to update cache key index");
      }
    }

    if had_entry != had_record {
      warn!(
        resource,
        key = %key,
        had_entry,
        had_record,
        "cache key index out of sync with stored entries"
      );
    }
  }

  /// Remove every indexed entry of this application and empty the volatile tier.
  pub fn clear_all(&self) {
    match self.read_index() {
      Ok((_, index)) => {
        for key in index.keys() {
          if let Err(e) = self.durable.remove_item(key) {
            warn!(key = %key, error = %e, "failed to remove durable cache entry");
          }
        }
        if let Err(e) = self.durable.remove_item(&self.index_key()) {
          warn!(error = %e, "failed to remove cache key index");
        }
      }
      Err(e) => warn!(error = %e, "failed to read cache key index"),
    }

    self.memory().clear();
  }

  /// Indexed durable keys with their expiration timestamps.
  pub fn keys(&self) -> Vec<(String, Option<i64>)> {
    match self.read_index() {
      Ok((_, index)) => index.into_iter().collect(),
      Err(e) => {
        warn!(error = %e, "failed to read cache key index");
        Vec::new()
      }
    }
  }

  fn read_durable(&self, resource: &str) -> Option<CacheEntry> {
    let key = self.key(resource);
    let raw = match self.durable.get_item(&key) {
      Ok(raw) => raw?,
      Err(e) => {
        warn!(resource, error = %e, "durable cache read failed");
        return None;
      }
    };

    match serde_json::from_str(&raw) {
      Ok(entry) => Some(entry),
      Err(e) => {
        warn!(resource, key = %key, error = %e, "malformed cache entry, treating as miss");
        None
      }
    }
  }

  /// Read the key index, returning the raw stored text alongside the parsed map.
  fn read_index(&self) -> Result<(Option<String>, KeyIndex), StorageError> {
    let raw = self.durable.get_item(&self.index_key())?;
    let index = match raw.as_deref() {
      Some(text) => serde_json::from_str(text).unwrap_or_else(|e| {
        warn!(error = %e, "malformed cache key index, starting a new one");
        KeyIndex::new()
      }),
      None => KeyIndex::new(),
    };
    Ok((raw, index))
  }

  fn write_index(&self, index: &KeyIndex) -> Result<(), StorageError> {
    let text = serde_json::to_string(index).map_err(|e| StorageError::Backend(e.to_string()))?;
    self.durable.set_item(&self.index_key(), &text)
  }

  /// Write the index record and then the entry body.
  ///
  /// On failure the key is dropped from durable storage entirely, so the
  /// index never points at a missing entry and no stale body survives.
  fn write_durable(&self, entry: &CacheEntry) -> Result<(), StorageError> {
    let key = self.key(&entry.resource);
    let body = serde_json::to_string(entry).map_err(|e| StorageError::Backend(e.to_string()))?;

    let (previous, mut index) = match self.read_index() {
      Ok(found) => found,
      Err(e) => {
        // The index is unreadable, so only the body can be dropped.
        self.remove_body(&key);
        return Err(e);
      }
    };
    index.insert(key.clone(), entry.timestamp);

    let result = self
      .write_index(&index)
      .and_then(|()| self.durable.set_item(&key, &body));

    if result.is_err() {
      self.discard_durable(&key, previous.as_deref());
    }
    result
  }

  fn remove_body(&self, key: &str) {
    if let Err(e) = self.durable.remove_item(key) {
      warn!(key = %key, error = %e, "failed to remove stale durable cache entry");
    }
  }

  fn discard_durable(&self, key: &str, previous_index: Option<&str>) {
    self.remove_body(key);

    let mut index: KeyIndex = previous_index
      .and_then(|text| serde_json::from_str(text).ok())
      .unwrap_or_default();
    index.remove(key);
    if let Err(e) = self.write_index(&index) {
      warn!(key = %key, error = %e, "failed to restore cache key index");
    }
  }
}
