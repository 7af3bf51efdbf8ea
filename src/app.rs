//! Application context: one named cache namespace with its own defaults.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheStore, DurableStorage, Expiry, SyncCoordinator};
use crate::config::AppConfig;

/// A running application instance.
///
/// Several applications may share one durable backend; their keys never
/// collide because each store is namespaced by the application name.
pub struct Application<D: DurableStorage> {
  name: String,
  sync: SyncCoordinator<D>,
}

impl<D: DurableStorage> Application<D> {
  /// Create the application and seed any prefetched data.
  pub fn init(config: &AppConfig, storage: D) -> Self {
    let store = Arc::new(CacheStore::new(config.name.clone(), storage));
    let sync = SyncCoordinator::new(store, config.defaults());
    let app = Self {
      name: config.name.clone(),
      sync,
    };

    let expire = config.prefetched_expire.unwrap_or(config.cache_expire);
    app.seed(&config.prefetched, expire);

    info!(app = %app.name, auto_cache = config.auto_cache, "application initialized");
    app
  }

  fn seed(&self, prefetched: &BTreeMap<String, Value>, expire: Expiry) {
    for (resource, payload) in prefetched {
      debug!(app = %self.name, resource = %resource, "seeding prefetched data");
      self.sync.store().set(resource, payload.clone(), expire);
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn store(&self) -> &CacheStore<D> {
    self.sync.store()
  }

  pub fn sync(&self) -> &SyncCoordinator<D> {
    &self.sync
  }

  /// Shut the application down, releasing its storage handle.
  pub fn teardown(self) {
    info!(app = %self.name, "application torn down");
  }
}
