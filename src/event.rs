use serde_json::Value;
use tokio::sync::mpsc;

use crate::cache::{CacheSettings, CollectionMeta, Entity};
use crate::entity::{Collection, Model};

/// Kind of local change to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
  Add,
  Remove,
  Change,
  Reset,
}

/// A local change, carrying the entity as it looks after the change
#[derive(Debug, Clone)]
pub struct Mutation {
  pub kind: MutationKind,
  /// The change came from applying cached data
  pub from_cache: bool,
  pub entity: EntitySnapshot,
}

/// Detached copy of an entity, without its subscribers
#[derive(Debug, Clone)]
pub enum EntitySnapshot {
  Collection(Collection),
  Model(Model),
}

impl EntitySnapshot {
  fn inner(&self) -> &dyn Entity {
    match self {
      EntitySnapshot::Collection(c) => c,
      EntitySnapshot::Model(m) => m,
    }
  }

  /// True for a collection with no records
  pub fn is_empty_collection(&self) -> bool {
    matches!(self, EntitySnapshot::Collection(c) if c.is_empty())
  }
}

impl Entity for EntitySnapshot {
  fn resource(&self) -> Option<String> {
    self.inner().resource()
  }

  fn is_collection(&self) -> bool {
    self.inner().is_collection()
  }

  fn identity(&self) -> Option<Value> {
    self.inner().identity()
  }

  fn id_attribute(&self) -> &str {
    self.inner().id_attribute()
  }

  fn to_payload(&self) -> Value {
    self.inner().to_payload()
  }

  fn settings(&self) -> &CacheSettings {
    self.inner().settings()
  }

  fn owner(&self) -> Option<&CollectionMeta> {
    self.inner().owner()
  }

  fn records_field(&self) -> Option<&str> {
    self.inner().records_field()
  }

  fn url(&self) -> Option<String> {
    self.inner().url()
  }
}

/// Fan-out of mutation events to subscribers.
///
/// Cloning an entity never clones its subscribers, so snapshots stay silent.
#[derive(Debug, Default)]
pub struct EventBus {
  subscribers: Vec<mpsc::UnboundedSender<Mutation>>,
}

impl Clone for EventBus {
  fn clone(&self) -> Self {
    Self::default()
  }
}

impl EventBus {
  /// Register a new subscriber
  pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Mutation> {
    let (tx, rx) = mpsc::unbounded_channel();
    self.subscribers.push(tx);
    rx
  }

  pub fn has_subscribers(&self) -> bool {
    !self.subscribers.is_empty()
  }

  /// Send to every live subscriber, dropping closed ones
  pub fn emit(&mut self, mutation: Mutation) {
    self
      .subscribers
      .retain(|tx| tx.send(mutation.clone()).is_ok());
  }
}
