use std::sync::Arc;
use tracing::info;

use super::operations::CacheOperations;
use super::{RefreshRequest, Refresher};
use crate::cache::{CacheKey, CacheStore};
use crate::documents::Document;
use crate::notify::Notifier;

/// Invalidates the TTL store and the query results, then requests refetches.
///
/// Invalidation of every affected result set is issued before any refetch.
/// Overlapping refreshes are not serialized; the fetch that resolves last
/// wins at the query layer.
pub struct RefreshDriver {
  store: Arc<CacheStore<Document>>,
  operations: Arc<CacheOperations>,
  notifier: Option<Notifier>,
}

impl RefreshDriver {
  pub fn new(store: Arc<CacheStore<Document>>, operations: Arc<CacheOperations>) -> Self {
    Self {
      store,
      operations,
      notifier: None,
    }
  }

  pub fn with_notifier(mut self, notifier: Notifier) -> Self {
    self.notifier = Some(notifier);
    self
  }

  pub fn operations(&self) -> &Arc<CacheOperations> {
    &self.operations
  }
}

impl Refresher for RefreshDriver {
  fn refresh(&self, request: RefreshRequest) {
    let pet_id = request.scope.pet_id.as_deref();

    self.store.invalidate_documents(pet_id);
    if request.scope.include_archived {
      self.store.clear(Some(&CacheKey::Archived));
    }
    self.operations.invalidate_queries(pet_id);
    if request.scope.include_archived {
      self.operations.invalidate_archived();
    }

    self.operations.refetch_queries(pet_id);
    if request.scope.include_archived {
      self.operations.refetch_archived();
    }

    info!(reason = ?request.reason, pet_id = ?pet_id, archived = request.scope.include_archived, "documents refreshed");

    if request.announce {
      if let Some(notifier) = &self.notifier {
        notifier.info("Documents refreshed");
      }
    }
  }
}
