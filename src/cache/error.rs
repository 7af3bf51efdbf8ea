//! Error types for the cache and sync pipeline.
//!
//! Storage faults never leave `CacheStore`; they are logged and downgraded to
//! volatile-only behavior. Only `SyncError` reaches callers of a read.

/// Failure reported by a durable storage backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
  /// Storage is disabled or could not be reached.
  #[error("durable storage unavailable: {0}")]
  Unavailable(String),

  /// Writing the value would exceed the storage quota.
  #[error("durable storage quota exceeded: need {needed} bytes, quota is {quota}")]
  QuotaExceeded { needed: usize, quota: usize },

  /// Any other backend failure.
  #[error("durable storage error: {0}")]
  Backend(String),
}

impl From<rusqlite::Error> for StorageError {
  fn from(e: rusqlite::Error) -> Self {
    StorageError::Backend(e.to_string())
  }
}

/// Failure reported by a remote transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
  /// The remote answered with a non-success status.
  #[error("request to {url} failed with status {status}")]
  Status { status: u16, url: String },

  /// The request could not be built or sent.
  #[error("request failed: {0}")]
  Request(String),

  /// The response body was not valid JSON.
  #[error("failed to decode response: {0}")]
  Decode(String),
}

/// Error surfaced by a read through the sync coordinator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
  /// Cache-only read found nothing usable.
  #[error("resource not found locally: {resource}")]
  CacheOnlyMiss { resource: String },

  /// Remote transport failure, forwarded unchanged.
  #[error(transparent)]
  Remote(#[from] TransportError),
}

/// Error from a batch read: the first member that failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("batch member {index} ({resource}) failed: {source}")]
pub struct BatchError {
  /// Position of the failing entity in the batch.
  pub index: usize,
  /// Resource of the failing entity, or `<unresolved>`.
  pub resource: String,
  #[source]
  pub source: SyncError,
}
