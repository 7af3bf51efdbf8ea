//! Batch reads of several entities at once.

use futures::future::try_join_all;
use serde_json::Value;
use tracing::warn;

use super::error::BatchError;
use super::layer::{SyncCoordinator, UNRESOLVED_RESOURCE};
use super::storage::DurableStorage;
use super::traits::{CacheResult, Entity, FetchOptions};
use crate::transport::RemoteTransport;

impl<D: DurableStorage> SyncCoordinator<D> {
  /// Read several entities concurrently.
  ///
  /// Results come back in input order. The first failure aborts every read
  /// still in flight and is the only error reported.
  pub async fn fetch_many<T: RemoteTransport>(
    &self,
    entities: &[&dyn Entity],
    options: &FetchOptions,
    transport: &T,
  ) -> Result<Vec<CacheResult<Value>>, BatchError> {
    let reads = entities.iter().enumerate().map(|(index, entity)| async move {
      self
        .read(*entity, options, transport)
        .await
        .map_err(|source| BatchError {
          index,
          resource: entity
            .resource()
            .unwrap_or_else(|| UNRESOLVED_RESOURCE.to_string()),
          source,
        })
    });

    // Dropping the remaining futures cancels their requests.
    try_join_all(reads).await.inspect_err(|e| {
      warn!(index = e.index, resource = %e.resource, error = %e.source, "batch read failed, aborting the rest");
    })
  }
}
