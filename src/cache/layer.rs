//! Sync coordinator that puts the cache in front of a remote transport.
//!
//! A read runs through four explicit steps, each exposed on its own so callers
//! can compose them differently: `lookup` (cache check), `resolve_policy`,
//! the transport call and `write_response` (cache write).

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::error::SyncError;
use super::merge;
use super::policy::{self, cascade, AppDefaults, CachePolicy, Expiry};
use super::storage::DurableStorage;
use super::store::{now_millis, CacheStore, WriteOutcome};
use super::traits::{CacheResult, Entity, FetchOptions};
use crate::event::{Mutation, MutationKind};
use crate::transport::{RemoteRequest, RemoteResponse, RemoteTransport};

/// Placeholder used in errors for entities without a resource.
pub const UNRESOLVED_RESOURCE: &str = "<unresolved>";

/// What write-propagation did with a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
  /// Caching is off for the entity, or the change came from the cache.
  Skipped,
  Written(WriteOutcome),
  /// A reset to an empty collection removed the entry.
  Cleared,
}

/// Coordinates reads and local changes with the cache store.
pub struct SyncCoordinator<D: DurableStorage> {
  store: Arc<CacheStore<D>>,
  defaults: AppDefaults,
}

impl<D: DurableStorage> SyncCoordinator<D> {
  pub fn new(store: Arc<CacheStore<D>>, defaults: AppDefaults) -> Self {
    Self { store, defaults }
  }

  pub fn store(&self) -> &CacheStore<D> {
    &self.store
  }

  pub fn defaults(&self) -> &AppDefaults {
    &self.defaults
  }

  /// Read an entity, preferring cached data.
  ///
  /// 1. No resource: go straight to the transport, nothing is cached
  /// 2. Unless `fresh`, serve a cache hit without a remote call
  /// 3. Cache-only reads fail on a miss
  /// 4. Otherwise read remotely and write the result per the resolved policy
  pub async fn read<E, T>(
    &self,
    entity: &E,
    options: &FetchOptions,
    transport: &T,
  ) -> Result<CacheResult<Value>, SyncError>
  where
    E: Entity + ?Sized,
    T: RemoteTransport,
  {
    let local_only = options.local_only || entity.settings().local_only;

    let Some(resource) = entity.resource() else {
      if local_only {
        return Err(SyncError::CacheOnlyMiss {
          resource: UNRESOLVED_RESOURCE.to_string(),
        });
      }
      debug!("entity has no resource, reading uncached");
      let response = transport.read(&RemoteRequest::for_entity(entity)).await?;
      return Ok(CacheResult::passthrough(response.payload));
    };

    if !options.fresh {
      if let Some(data) = self.lookup(entity) {
        debug!(resource = %resource, "serving read from cache");
        return Ok(CacheResult::from_cache(data));
      }
    }

    if local_only {
      debug!(resource = %resource, "cache-only read missed");
      return Err(SyncError::CacheOnlyMiss { resource });
    }

    let policy = self.resolve_policy(entity, options);
    debug!(resource = %resource, ?policy, "reading from remote");

    let response = transport.read(&RemoteRequest::for_entity(entity)).await?;
    let written = self.write_response(entity, &policy, &response);
    Ok(CacheResult::from_remote(response.payload, written.is_some()))
  }

  /// Cached data for an entity, if present and fresh.
  ///
  /// A model attached to a collection is looked up inside the collection's
  /// cached payload, and its own record expiration is checked too.
  pub fn lookup<E: Entity + ?Sized>(&self, entity: &E) -> Option<Value> {
    let resource = entity.resource()?;
    let entry = self.store.get(&resource)?;

    if entity.is_collection() {
      return Some(entry.payload);
    }

    match entity.owner() {
      Some(_) => {
        let id = entity.identity()?;
        let mut record = merge::find_record(
          &entry.payload,
          entity.records_field(),
          entity.id_attribute(),
          &id,
        )?;
        if merge::record_expired(&record, now_millis()) {
          debug!(resource = %resource, "cached record expired");
          return None;
        }
        merge::strip_expiry(&mut record);
        Some(record)
      }
      None => match entity.identity() {
        Some(id) if entry.payload.get(entity.id_attribute()) != Some(&id) => None,
        _ => Some(entry.payload),
      },
    }
  }

  /// Resolve the cache policy for a read of `entity`.
  pub fn resolve_policy<E: Entity + ?Sized>(&self, entity: &E, options: &FetchOptions) -> CachePolicy {
    policy::resolve(
      options,
      entity.settings(),
      entity.owner().map(|o| &o.settings),
      &self.defaults,
    )
  }

  /// Write a remote response to the cache according to `policy`.
  ///
  /// Returns `None` when nothing was written.
  pub fn write_response<E: Entity + ?Sized>(
    &self,
    entity: &E,
    policy: &CachePolicy,
    response: &RemoteResponse,
  ) -> Option<WriteOutcome> {
    match policy {
      CachePolicy::Disabled => None,
      CachePolicy::Local { expire } => self.write(entity, response.payload.clone(), *expire),
      CachePolicy::Server { header } => {
        let Some(expire) = response.header(header).and_then(policy::server_expiry) else {
          debug!(header = %header, "no usable max-age in response, not caching");
          return None;
        };
        self.write(entity, response.payload.clone(), Some(expire))
      }
    }
  }

  /// Write an entity's payload to the cache.
  ///
  /// `expire` overrides the entity and application expiration. A model
  /// attached to a collection is merged into the collection's cached payload;
  /// its own expiration, if any, is stamped on the record. Nothing is written
  /// for such a model while its collection is not cached.
  pub fn write<E: Entity + ?Sized>(
    &self,
    entity: &E,
    payload: Value,
    expire: Option<Expiry>,
  ) -> Option<WriteOutcome> {
    let resource = entity.resource()?;
    let settings = entity.settings();

    let outcome = match entity.owner().filter(|_| !entity.is_collection()) {
      Some(owner) => {
        let mut record = payload;
        let record_expire = cascade([expire, settings.expire_local]);
        if let Some(deadline) = record_expire.and_then(|e| e.deadline(now_millis())) {
          merge::stamp_expiry(&mut record, deadline);
        }

        // Without the collection's full record set a write would leave a
        // partial payload that later collection reads take as a hit.
        let merged = self.store.get(&resource).and_then(|entry| {
          merge::merge_record(
            entry.payload,
            entity.records_field(),
            entity.id_attribute(),
            record,
          )
        });
        let Some(merged) = merged else {
          debug!(resource = %resource, "owning collection not cached, skipping model write");
          return None;
        };
        let expire = cascade([expire, owner.settings.expire_local]).unwrap_or(self.defaults.cache_expire);
        self.store.set(&resource, merged, expire)
      }
      None => {
        let expire = cascade([expire, settings.expire_local]).unwrap_or(self.defaults.cache_expire);
        self.store.set(&resource, payload, expire)
      }
    };

    debug!(resource = %resource, ?outcome, "cache written");
    Some(outcome)
  }

  /// Keep the cache in step with a local change.
  pub fn propagate(&self, mutation: &Mutation) -> Propagation {
    let entity = &mutation.entity;
    if mutation.from_cache {
      return Propagation::Skipped;
    }
    let Some(resource) = entity.resource() else {
      return Propagation::Skipped;
    };

    let enabled = cascade([
      entity.settings().cache_local,
      entity.owner().and_then(|o| o.settings.cache_local),
      Some(self.defaults.auto_cache),
    ])
    .unwrap_or(false);
    if !enabled {
      return Propagation::Skipped;
    }

    if mutation.kind == MutationKind::Reset && entity.is_empty_collection() {
      debug!(resource = %resource, "collection reset to empty, clearing cache");
      self.store.clear(&resource);
      return Propagation::Cleared;
    }

    match self.write(entity, entity.to_payload(), None) {
      Some(outcome) => Propagation::Written(outcome),
      None => Propagation::Skipped,
    }
  }

  /// Apply mutations from a subscription until every sender is gone.
  /// Returns how many mutations changed the cache.
  pub async fn watch(&self, mut rx: mpsc::UnboundedReceiver<Mutation>) -> usize {
    let mut applied = 0;
    while let Some(mutation) = rx.recv().await {
      match self.propagate(&mutation) {
        Propagation::Skipped => {}
        Propagation::Written(WriteOutcome::VolatileOnly) => {
          warn!("propagated change kept in memory only");
          applied += 1;
        }
        _ => applied += 1,
      }
    }
    applied
  }
}

impl<D: DurableStorage> Clone for SyncCoordinator<D> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      defaults: self.defaults.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{DisabledStorage, SqliteStorage};
  use crate::cache::testing::MockTransport;
  use crate::cache::{CacheSource, TransportError};
  use crate::entity::{parse_id, Collection, Model};
  use crate::transport::Offline;
  use serde_json::json;

  fn coordinator(auto_cache: bool) -> SyncCoordinator<SqliteStorage> {
    let store = CacheStore::new("app", SqliteStorage::open_in_memory().unwrap());
    SyncCoordinator::new(
      Arc::new(store),
      AppDefaults {
        auto_cache,
        ..Default::default()
      },
    )
  }

  #[tokio::test]
  async fn test_nothing_cached_without_policy() {
    let sync = coordinator(false);
    let transport = MockTransport::new().with_response("todos", json!([{"id": 1}]));
    let todos = Collection::new("todos");

    let result = sync.read(&todos, &FetchOptions::default(), &transport).await.unwrap();
    assert_eq!(result.source, CacheSource::RemoteUncached);
    assert_eq!(sync.store().get("todos"), None);
  }

  #[tokio::test]
  async fn test_second_read_served_from_cache() {
    let sync = coordinator(false);
    let transport = MockTransport::new().with_response("todos", json!([{"id": 1, "title": "a"}]));
    let todos = Collection::new("todos")
      .with_cache_local(true)
      .with_expire_local(Expiry::Never);

    let first = sync.read(&todos, &FetchOptions::default(), &transport).await.unwrap();
    assert_eq!(first.source, CacheSource::RemoteCached);

    let second = sync.read(&todos, &FetchOptions::default(), &transport).await.unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.data, json!([{"id": 1, "title": "a"}]));
    assert_eq!(transport.calls(), 1);
    assert_eq!(sync.store().get("todos").unwrap().timestamp, None);
  }

  #[tokio::test]
  async fn test_fresh_read_skips_cache() {
    let sync = coordinator(true);
    let transport = MockTransport::new().with_response("todos", json!([]));
    let todos = Collection::new("todos");

    sync.read(&todos, &FetchOptions::default(), &transport).await.unwrap();
    let result = sync
      .read(&todos, &FetchOptions::default().fresh(), &transport)
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::RemoteCached);
    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test]
  async fn test_call_override_suppresses_auto_cache() {
    let sync = coordinator(true);
    let transport = MockTransport::new().with_response("todos", json!([{"id": 1}]));
    let todos = Collection::new("todos");

    let result = sync
      .read(&todos, &FetchOptions::default().cache_local(false), &transport)
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::RemoteUncached);
    assert_eq!(sync.store().get("todos"), None);
  }

  #[tokio::test]
  async fn test_model_missing_from_cached_collection_reads_remote() {
    let sync = coordinator(false);
    sync.store().set("todos", json!([{"id": 1}, {"id": 2}]), Expiry::Never);
    let transport = MockTransport::new().with_response("todos/5", json!({"id": 5}));
    let model = Collection::new("todos").model(json!({"id": 5}));

    let result = sync.read(&model, &FetchOptions::default(), &transport).await.unwrap();
    assert_eq!(result.data, json!({"id": 5}));
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test]
  async fn test_model_served_from_cached_collection() {
    let sync = coordinator(false);
    sync.store().set(
      "todos",
      json!([{"id": 1, "title": "a"}, {"id": 2, "title": "b"}]),
      Expiry::Never,
    );
    let transport = MockTransport::new();
    let model = Collection::new("todos").model(json!({"id": 2}));

    let result = sync.read(&model, &FetchOptions::default(), &transport).await.unwrap();
    assert!(result.is_from_cache());
    assert_eq!(result.data, json!({"id": 2, "title": "b"}));
    assert_eq!(transport.calls(), 0);
  }

  #[tokio::test]
  async fn test_numeric_id_from_text_hits_cache_offline() {
    let sync = coordinator(false);
    sync.store().set("todos", json!([{"id": 5, "title": "five"}]), Expiry::Never);
    let todos = Collection::new("todos");
    let model = todos.model_with_id(parse_id("5"));

    let result = sync
      .read(&model, &FetchOptions::default().local_only(), &Offline)
      .await
      .unwrap();
    assert!(result.is_from_cache());
    assert_eq!(result.data, json!({"id": 5, "title": "five"}));
  }

  #[tokio::test]
  async fn test_model_read_merges_into_collection() {
    let sync = coordinator(false);
    sync.store().set(
      "todos",
      json!([{"id": 1, "title": "a"}, {"id": 2, "title": "b"}]),
      Expiry::Never,
    );
    let transport = MockTransport::new().with_response("todos/2", json!({"id": 2, "title": "new"}));
    let todos = Collection::new("todos").with_cache_local(true);
    let model = todos.model(json!({"id": 2}));

    let result = sync
      .read(&model, &FetchOptions::default().fresh(), &transport)
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::RemoteCached);

    let cached = sync.store().get("todos").unwrap().payload;
    assert_eq!(cached, json!([{"id": 1, "title": "a"}, {"id": 2, "title": "new"}]));
  }

  #[tokio::test]
  async fn test_model_read_without_cached_collection_writes_nothing() {
    let sync = coordinator(false);
    let transport = MockTransport::new()
      .with_response("todos/5", json!({"id": 5}))
      .with_response("todos", json!([{"id": 4}, {"id": 5}, {"id": 6}]));
    let todos = Collection::new("todos").with_cache_local(true);

    let model = sync
      .read(&todos.model(json!({"id": 5})), &FetchOptions::default(), &transport)
      .await
      .unwrap();
    assert_eq!(model.source, CacheSource::RemoteUncached);
    assert_eq!(sync.store().get("todos"), None);

    let collection = sync.read(&todos, &FetchOptions::default(), &transport).await.unwrap();
    assert_eq!(collection.source, CacheSource::RemoteCached);
    assert_eq!(collection.data, json!([{"id": 4}, {"id": 5}, {"id": 6}]));
    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test]
  async fn test_model_record_expiration() {
    let sync = coordinator(false);
    sync.store().set("todos", json!([{"id": 1}]), Expiry::Never);
    let todos = Collection::new("todos");
    let model = todos.model(json!({"id": 2})).with_expire_local(Expiry::Minutes(-1.0));

    sync.write(&model, json!({"id": 2}), None);

    assert_eq!(sync.lookup(&model), None);
    assert!(sync.lookup(&todos.model(json!({"id": 1}))).is_some());
    let cached = sync.lookup(&todos).unwrap();
    assert_eq!(merge::records(&cached, None).unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_record_expiry_is_stripped_on_hit() {
    let sync = coordinator(false);
    sync.store().set("todos", json!([]), Expiry::Never);
    let model = Collection::new("todos")
      .model(json!({"id": 3}))
      .with_expire_local(Expiry::Minutes(10.0));

    sync.write(&model, json!({"id": 3, "done": true}), None);
    assert_eq!(sync.lookup(&model), Some(json!({"id": 3, "done": true})));
  }

  #[tokio::test]
  async fn test_standalone_model_identity_must_match() {
    let sync = coordinator(false);
    sync.store().set("profile", json!({"id": 1, "name": "Ada"}), Expiry::Never);

    let same = Model::new(json!({"id": 1})).with_resource("profile");
    let other = Model::new(json!({"id": 2})).with_resource("profile");
    let singleton = Model::new(json!({})).with_resource("profile");

    assert!(sync.lookup(&same).is_some());
    assert_eq!(sync.lookup(&other), None);
    assert!(sync.lookup(&singleton).is_some());
  }

  #[tokio::test]
  async fn test_cache_only_miss_never_hits_network() {
    let sync = coordinator(true);
    let transport = MockTransport::new().with_response("todos", json!([]));

    let err = sync
      .read(&Collection::new("todos"), &FetchOptions::default().local_only(), &transport)
      .await
      .unwrap_err();
    assert_eq!(
      err,
      SyncError::CacheOnlyMiss {
        resource: "todos".to_string()
      }
    );

    let err = sync
      .read(&Collection::new("todos").local_only(), &FetchOptions::default(), &transport)
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::CacheOnlyMiss { .. }));
    assert_eq!(transport.calls(), 0);
  }

  #[tokio::test]
  async fn test_cache_only_hit() {
    let sync = coordinator(false);
    sync.store().set("todos", json!([{"id": 1}]), Expiry::Never);
    let transport = MockTransport::new();

    let result = sync
      .read(&Collection::new("todos"), &FetchOptions::default().local_only(), &transport)
      .await
      .unwrap();
    assert!(result.is_from_cache());
  }

  #[tokio::test]
  async fn test_unresolved_resource_passes_through() {
    let sync = coordinator(true);
    let transport = MockTransport::new().with_response("/raw", json!({"ok": true}));
    let raw = Collection::without_resource().with_url("/raw");

    let result = sync.read(&raw, &FetchOptions::default(), &transport).await.unwrap();
    assert_eq!(result.source, CacheSource::Passthrough);
    assert!(sync.store().keys().is_empty());
  }

  #[tokio::test]
  async fn test_remote_error_is_forwarded() {
    let sync = coordinator(true);
    let error = TransportError::Status {
      status: 503,
      url: "todos".to_string(),
    };
    let transport = MockTransport::new().with_error("todos", error.clone());

    let err = sync
      .read(&Collection::new("todos"), &FetchOptions::default(), &transport)
      .await
      .unwrap_err();
    assert_eq!(err, SyncError::Remote(error));
    assert_eq!(sync.store().get("todos"), None);
  }

  #[tokio::test]
  async fn test_server_policy_uses_max_age() {
    let sync = coordinator(false);
    let transport = MockTransport::new().with_response_headers(
      "todos",
      json!([{"id": 1}]),
      &[("Cache-Control", "public, max-age=120")],
    );
    let todos = Collection::new("todos").with_cache_policy("cache-control");

    let before = now_millis();
    let result = sync.read(&todos, &FetchOptions::default(), &transport).await.unwrap();
    assert_eq!(result.source, CacheSource::RemoteCached);

    let deadline = sync.store().get("todos").unwrap().timestamp.unwrap();
    assert!(deadline >= before + 120_000);
    assert!(deadline <= now_millis() + 120_000);
  }

  #[tokio::test]
  async fn test_server_policy_without_header_skips_cache() {
    let sync = coordinator(true);
    let transport = MockTransport::new().with_response("todos", json!([{"id": 1}]));
    let todos = Collection::new("todos").with_cache_policy("Cache-Control");

    let result = sync.read(&todos, &FetchOptions::default(), &transport).await.unwrap();
    assert_eq!(result.source, CacheSource::RemoteUncached);
    assert_eq!(sync.store().get("todos"), None);
  }

  #[tokio::test]
  async fn test_failing_durable_tier_still_caches_in_memory() {
    let store = CacheStore::new("app", DisabledStorage);
    let sync = SyncCoordinator::new(
      Arc::new(store),
      AppDefaults {
        auto_cache: true,
        ..Default::default()
      },
    );
    let transport = MockTransport::new().with_response("todos", json!([{"id": 1}]));
    let todos = Collection::new("todos");

    sync.read(&todos, &FetchOptions::default(), &transport).await.unwrap();
    let second = sync.read(&todos, &FetchOptions::default(), &transport).await.unwrap();
    assert!(second.is_from_cache());
    assert_eq!(transport.calls(), 1);
  }

  #[test]
  fn test_propagate_add_rewrites_entry() {
    let sync = coordinator(false);
    let mut todos = Collection::new("todos").with_cache_local(true);
    let mut rx = todos.subscribe();

    todos.add(json!({"id": 1}));
    todos.add(json!({"id": 2}));

    while let Ok(mutation) = rx.try_recv() {
      assert!(matches!(sync.propagate(&mutation), Propagation::Written(_)));
    }
    assert_eq!(
      sync.store().get("todos").unwrap().payload,
      json!([{"id": 1}, {"id": 2}])
    );
  }

  #[test]
  fn test_propagate_reset_to_empty_clears() {
    let sync = coordinator(true);
    sync.store().set("todos", json!([{"id": 1}]), Expiry::Never);
    let mut todos = Collection::new("todos");
    let mut rx = todos.subscribe();

    todos.reset(vec![]);
    assert_eq!(sync.propagate(&rx.try_recv().unwrap()), Propagation::Cleared);
    assert_eq!(sync.store().get("todos"), None);
  }

  #[test]
  fn test_propagate_reset_with_caching_off_keeps_entry() {
    let sync = coordinator(false);
    sync.store().set("todos", json!([{"id": 1}]), Expiry::Never);
    let mut todos = Collection::new("todos");
    let mut rx = todos.subscribe();

    todos.reset(vec![]);
    assert_eq!(sync.propagate(&rx.try_recv().unwrap()), Propagation::Skipped);
    assert_eq!(sync.store().get("todos").unwrap().payload, json!([{"id": 1}]));
  }

  #[test]
  fn test_propagate_skips_cache_origin_and_disabled() {
    let sync = coordinator(false);
    let mut todos = Collection::new("todos");
    let mut rx = todos.subscribe();

    todos.add(json!({"id": 1}));
    assert_eq!(sync.propagate(&rx.try_recv().unwrap()), Propagation::Skipped);

    let mut cached = Collection::new("todos").with_cache_local(true);
    let mut rx = cached.subscribe();
    cached.apply(&CacheResult::from_cache(json!([{"id": 1}])));
    assert_eq!(sync.propagate(&rx.try_recv().unwrap()), Propagation::Skipped);
    assert_eq!(sync.store().get("todos"), None);
  }

  #[test]
  fn test_propagate_model_change_merges() {
    let sync = coordinator(false);
    sync.store().set("todos", json!([{"id": 1, "done": false}]), Expiry::Never);
    let todos = Collection::new("todos").with_cache_local(true);
    let mut model = todos.model(json!({"id": 1, "done": false}));
    let mut rx = model.subscribe();

    model.set(json!({"done": true}));
    sync.propagate(&rx.try_recv().unwrap());

    assert_eq!(
      sync.store().get("todos").unwrap().payload,
      json!([{"id": 1, "done": true}])
    );
  }

  #[tokio::test]
  async fn test_watch_drains_subscription() {
    let sync = coordinator(true);
    let mut todos = Collection::new("todos");
    let rx = todos.subscribe();

    todos.add(json!({"id": 1}));
    todos.update(json!({"id": 1, "title": "x"}));
    drop(todos);

    assert_eq!(sync.watch(rx).await, 2);
    assert_eq!(
      sync.store().get("todos").unwrap().payload,
      json!([{"id": 1, "title": "x"}])
    );
  }
}
