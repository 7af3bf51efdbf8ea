//! Concrete entities: a collection of JSON records and a single model.
//!
//! Both emit `Mutation` events when changed locally so the sync coordinator
//! can keep the cache in step with in-memory state.

use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cache::merge;
use crate::cache::{CacheResult, CacheSettings, CollectionMeta, Entity, Expiry, PolicyToken};
use crate::event::{EntitySnapshot, EventBus, Mutation, MutationKind};

/// An ordered set of records sharing one resource.
#[derive(Debug, Clone)]
pub struct Collection {
  meta: Arc<CollectionMeta>,
  records: Vec<Value>,
  events: EventBus,
}

impl Collection {
  pub fn new(resource: impl Into<String>) -> Self {
    Self::from_meta(CollectionMeta::new(Some(resource.into())))
  }

  /// A collection with no resource; its reads are never cached.
  pub fn without_resource() -> Self {
    Self::from_meta(CollectionMeta::new(None))
  }

  fn from_meta(meta: CollectionMeta) -> Self {
    Self {
      meta: Arc::new(meta),
      records: Vec::new(),
      events: EventBus::default(),
    }
  }

  fn meta_mut(&mut self) -> &mut CollectionMeta {
    Arc::make_mut(&mut self.meta)
  }

  pub fn with_id_attribute(mut self, attribute: impl Into<String>) -> Self {
    self.meta_mut().id_attribute = attribute.into();
    self
  }

  /// Responses wrap the record array in an object under `field`.
  pub fn with_records_field(mut self, field: impl Into<String>) -> Self {
    self.meta_mut().records_field = Some(field.into());
    self
  }

  pub fn with_url(mut self, url: impl Into<String>) -> Self {
    self.meta_mut().url = Some(url.into());
    self
  }

  pub fn with_cache_local(mut self, enabled: bool) -> Self {
    self.meta_mut().settings.cache_local = Some(enabled);
    self
  }

  pub fn with_expire_local(mut self, expire: Expiry) -> Self {
    self.meta_mut().settings.expire_local = Some(expire);
    self
  }

  pub fn with_cache_policy(mut self, policy: impl Into<PolicyToken>) -> Self {
    self.meta_mut().settings.cache_policy = Some(policy.into());
    self
  }

  pub fn local_only(mut self) -> Self {
    self.meta_mut().settings.local_only = true;
    self
  }

  pub fn meta(&self) -> &CollectionMeta {
    &self.meta
  }

  pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Mutation> {
    self.events.subscribe()
  }

  pub fn records(&self) -> &[Value] {
    &self.records
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn get(&self, id: &Value) -> Option<&Value> {
    let attribute = &self.meta.id_attribute;
    self.records.iter().find(|r| r.get(attribute) == Some(id))
  }

  fn position(&self, id: &Value) -> Option<usize> {
    let attribute = &self.meta.id_attribute;
    self.records.iter().position(|r| r.get(attribute) == Some(id))
  }

  pub fn add(&mut self, record: Value) {
    self.records.push(record);
    self.notify(MutationKind::Add, false);
  }

  pub fn remove(&mut self, id: &Value) -> Option<Value> {
    let index = self.position(id)?;
    let removed = self.records.remove(index);
    self.notify(MutationKind::Remove, false);
    Some(removed)
  }

  /// Replace the record with the same identity. Returns false if none matched.
  pub fn update(&mut self, record: Value) -> bool {
    let Some(index) = record
      .get(&self.meta.id_attribute)
      .and_then(|id| self.position(id))
    else {
      return false;
    };
    self.records[index] = record;
    self.notify(MutationKind::Change, false);
    true
  }

  pub fn reset(&mut self, records: Vec<Value>) {
    self.records = records;
    self.notify(MutationKind::Reset, false);
  }

  /// Replace the records with the result of a read.
  pub fn apply(&mut self, result: &CacheResult<Value>) {
    self.records = merge::records(&result.data, self.meta.records_field.as_deref())
      .cloned()
      .unwrap_or_default();
    self.notify(MutationKind::Reset, result.is_from_cache());
  }

  /// Create an attached model holding only its identity.
  pub fn model_with_id(&self, id: Value) -> Model {
    let mut attributes = Map::new();
    attributes.insert(self.meta.id_attribute.clone(), id);
    self.model(Value::Object(attributes))
  }

  /// Create a model attached to this collection.
  pub fn model(&self, attributes: Value) -> Model {
    let mut model = Model::new(attributes).with_id_attribute(self.meta.id_attribute.clone());
    model.owner = Some(Arc::clone(&self.meta));
    model
  }

  fn notify(&mut self, kind: MutationKind, from_cache: bool) {
    if !self.events.has_subscribers() {
      return;
    }
    let mutation = Mutation {
      kind,
      from_cache,
      entity: EntitySnapshot::Collection(self.clone()),
    };
    self.events.emit(mutation);
  }
}

impl Entity for Collection {
  fn resource(&self) -> Option<String> {
    self.meta.resource.clone()
  }

  fn is_collection(&self) -> bool {
    true
  }

  fn id_attribute(&self) -> &str {
    &self.meta.id_attribute
  }

  fn to_payload(&self) -> Value {
    merge::wrap_records(self.records.clone(), self.meta.records_field.as_deref())
  }

  fn settings(&self) -> &CacheSettings {
    &self.meta.settings
  }

  fn records_field(&self) -> Option<&str> {
    self.meta.records_field.as_deref()
  }

  fn url(&self) -> Option<String> {
    self.meta.url.clone()
  }
}

/// A single JSON record, standalone or attached to a collection.
#[derive(Debug, Clone)]
pub struct Model {
  attributes: Value,
  id_attribute: String,
  resource: Option<String>,
  url: Option<String>,
  settings: CacheSettings,
  owner: Option<Arc<CollectionMeta>>,
  events: EventBus,
}

impl Model {
  pub fn new(attributes: Value) -> Self {
    Self {
      attributes,
      id_attribute: crate::cache::DEFAULT_ID_ATTRIBUTE.to_string(),
      resource: None,
      url: None,
      settings: CacheSettings::default(),
      owner: None,
      events: EventBus::default(),
    }
  }

  /// Resource for a standalone model. Ignored once attached to a collection.
  pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
    self.resource = Some(resource.into()).filter(|r| !r.is_empty());
    self
  }

  pub fn with_id_attribute(mut self, attribute: impl Into<String>) -> Self {
    self.id_attribute = attribute.into();
    self
  }

  pub fn with_url(mut self, url: impl Into<String>) -> Self {
    self.url = Some(url.into());
    self
  }

  pub fn with_cache_local(mut self, enabled: bool) -> Self {
    self.settings.cache_local = Some(enabled);
    self
  }

  pub fn with_expire_local(mut self, expire: Expiry) -> Self {
    self.settings.expire_local = Some(expire);
    self
  }

  pub fn with_cache_policy(mut self, policy: impl Into<PolicyToken>) -> Self {
    self.settings.cache_policy = Some(policy.into());
    self
  }

  pub fn local_only(mut self) -> Self {
    self.settings.local_only = true;
    self
  }

  pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Mutation> {
    self.events.subscribe()
  }

  pub fn attributes(&self) -> &Value {
    &self.attributes
  }

  pub fn get(&self, name: &str) -> Option<&Value> {
    self.attributes.get(name)
  }

  /// Merge `changes` into the attributes.
  pub fn set(&mut self, changes: Value) {
    self.merge_attributes(changes);
    self.notify(MutationKind::Change, false);
  }

  /// Take the attributes from the result of a read.
  pub fn apply(&mut self, result: &CacheResult<Value>) {
    self.merge_attributes(result.data.clone());
    self.notify(MutationKind::Change, result.is_from_cache());
  }

  fn merge_attributes(&mut self, changes: Value) {
    match (&mut self.attributes, changes) {
      (Value::Object(current), Value::Object(changes)) => current.extend(changes),
      (attributes, changes) => *attributes = changes,
    }
  }

  fn notify(&mut self, kind: MutationKind, from_cache: bool) {
    if !self.events.has_subscribers() {
      return;
    }
    let mutation = Mutation {
      kind,
      from_cache,
      entity: EntitySnapshot::Model(self.clone()),
    };
    self.events.emit(mutation);
  }
}

/// Identity typed as text, e.g. on a command line. Numbers stay numeric so
/// they match numeric ids in cached payloads; anything else is a string.
pub fn parse_id(raw: &str) -> Value {
  match serde_json::from_str::<Value>(raw.trim()) {
    Ok(id @ Value::Number(_)) => id,
    _ => Value::String(raw.to_string()),
  }
}

fn id_segment(id: &Value) -> String {
  match id {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

impl Entity for Model {
  fn resource(&self) -> Option<String> {
    match &self.owner {
      Some(owner) => owner.resource.clone(),
      None => self.resource.clone(),
    }
  }

  fn is_collection(&self) -> bool {
    false
  }

  fn identity(&self) -> Option<Value> {
    self
      .attributes
      .get(&self.id_attribute)
      .filter(|id| !id.is_null())
      .cloned()
  }

  fn id_attribute(&self) -> &str {
    &self.id_attribute
  }

  fn to_payload(&self) -> Value {
    self.attributes.clone()
  }

  fn settings(&self) -> &CacheSettings {
    &self.settings
  }

  fn owner(&self) -> Option<&CollectionMeta> {
    self.owner.as_deref()
  }

  fn url(&self) -> Option<String> {
    if self.url.is_some() {
      return self.url.clone();
    }
    let owner = self.owner.as_ref()?;
    let base = owner.url.clone().or_else(|| owner.resource.clone())?;
    let id = self.identity()?;
    Some(format!("{}/{}", base.trim_end_matches('/'), id_segment(&id)))
  }
}
