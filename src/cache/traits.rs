//! Core traits and types for the caching system.

use serde_json::Value;

use super::policy::{Expiry, PolicyToken};

/// Identity attribute used when an entity does not name its own.
pub const DEFAULT_ID_ATTRIBUTE: &str = "id";

/// Per-entity cache settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheSettings {
  /// Explicit caching flag; `None` defers to the next source.
  pub cache_local: Option<bool>,
  /// Explicit expiration; `None` defers to the next source.
  pub expire_local: Option<Expiry>,
  /// Policy token; a header token switches to server-driven expiration.
  pub cache_policy: Option<PolicyToken>,
  /// Reads for this entity are served from the cache or fail.
  pub local_only: bool,
}

/// Shared description of a collection: what its models inherit.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionMeta {
  pub resource: Option<String>,
  pub id_attribute: String,
  /// Field holding the record array when responses are wrapped in an object.
  pub records_field: Option<String>,
  pub url: Option<String>,
  pub settings: CacheSettings,
}

impl CollectionMeta {
  pub fn new(resource: Option<String>) -> Self {
    Self {
      resource: resource.filter(|r| !r.is_empty()),
      id_attribute: DEFAULT_ID_ATTRIBUTE.to_string(),
      records_field: None,
      url: None,
      settings: CacheSettings::default(),
    }
  }
}

/// Trait for entities whose reads go through the cache.
///
/// A model attached to a collection reports the collection as its owner and
/// shares the collection's resource.
pub trait Entity: Send + Sync {
  /// Resource this entity is cached under; `None` means uncacheable.
  fn resource(&self) -> Option<String>;

  /// Whether this entity is an ordered set of records.
  fn is_collection(&self) -> bool;

  /// Identity value of a model.
  fn identity(&self) -> Option<Value> {
    None
  }

  fn id_attribute(&self) -> &str {
    DEFAULT_ID_ATTRIBUTE
  }

  /// Plain JSON representation, shaped like the remote response.
  fn to_payload(&self) -> Value;

  fn settings(&self) -> &CacheSettings;

  /// Owning collection of a model.
  fn owner(&self) -> Option<&CollectionMeta> {
    None
  }

  /// Field holding the record array inside the collection payload this
  /// entity is cached in. A model inherits its owner's.
  fn records_field(&self) -> Option<&str> {
    self.owner().and_then(|owner| owner.records_field.as_deref())
  }

  /// Remote location of the entity, relative to the transport base.
  fn url(&self) -> Option<String> {
    None
  }
}

/// Per-call read options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
  pub cache_local: Option<bool>,
  pub expire_local: Option<Expiry>,
  /// Skip the cache lookup and go to the remote.
  pub fresh: bool,
  /// Never touch the remote.
  pub local_only: bool,
}

impl FetchOptions {
  pub fn fresh(mut self) -> Self {
    self.fresh = true;
    self
  }

  pub fn local_only(mut self) -> Self {
    self.local_only = true;
    self
  }

  pub fn cache_local(mut self, enabled: bool) -> Self {
    self.cache_local = Some(enabled);
    self
  }

  pub fn expire_local(mut self, expire: Expiry) -> Self {
    self.expire_local = Some(expire);
    self
  }
}

/// Result from a read, including data and metadata about the source.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  /// Data served from the cache without a remote call.
  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }

  /// Data fetched from the remote; `cached` tells whether it was written back.
  pub fn from_remote(data: T, cached: bool) -> Self {
    Self {
      data,
      source: if cached {
        CacheSource::RemoteCached
      } else {
        CacheSource::RemoteUncached
      },
    }
  }

  /// Data fetched from the remote for an entity with no resource.
  pub fn passthrough(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Passthrough,
    }
  }

  pub fn is_from_cache(&self) -> bool {
    self.source == CacheSource::Cache
  }
}

/// Indicates where read data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Served from the cache
  Cache,
  /// Fetched remotely and written to the cache
  RemoteCached,
  /// Fetched remotely, caching disabled by policy
  RemoteUncached,
  /// Fetched remotely, entity has no resource
  Passthrough,
}
