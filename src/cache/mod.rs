//! Two-tier local cache and the read-sync layer built on it.
//!
//! This module provides:
//! - A volatile in-process tier backed by durable key/value storage
//! - Expiration per entry, with lazy cleanup on read
//! - Cache policy resolution from call, entity, collection and app settings
//! - Merging of single-record reads into cached collection payloads
//! - Write-propagation of local changes back into the cache

mod batch;
mod error;
mod layer;
pub mod merge;
mod policy;
mod storage;
mod store;
#[cfg(test)]
pub(crate) mod testing;
mod traits;

pub use error::{BatchError, StorageError, SyncError, TransportError};
pub use layer::{Propagation, SyncCoordinator, UNRESOLVED_RESOURCE};
pub use policy::{
  cascade, parse_max_age, resolve, server_expiry, AppDefaults, CachePolicy, Expiry, PolicyToken,
  DEFAULT_EXPIRE_MINUTES,
};
pub use storage::{DisabledStorage, DurableStorage, SqliteStorage, DEFAULT_QUOTA_BYTES};
pub use store::{now_millis, CacheEntry, CacheStore, WriteOutcome};
pub use traits::{
  CacheResult, CacheSettings, CacheSource, CollectionMeta, Entity, FetchOptions,
  DEFAULT_ID_ATTRIBUTE,
};
