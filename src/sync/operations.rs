//! Mirrors writes into the query results views render from.

use std::sync::Arc;
use tracing::debug;

use crate::cache::Cacheable;
use crate::documents::cache::DocumentQueryKey;
use crate::documents::{Document, SyncState};
use crate::query::{InvalidateOptions, QueryLayer, QueryType, RefetchOptions};

/// Applies optimistic writes to, and requests refreshes of, the document
/// result sets held by a [`QueryLayer`].
///
/// No network calls start here; the layer decides how to refetch.
pub struct CacheOperations {
  layer: Arc<dyn QueryLayer<Vec<Document>>>,
  dashboard_limit: usize,
}

impl CacheOperations {
  pub fn new(layer: Arc<dyn QueryLayer<Vec<Document>>>, dashboard_limit: usize) -> Self {
    Self {
      layer,
      dashboard_limit: dashboard_limit.max(1),
    }
  }

  /// Result sets that show active documents, plus the pet view when given.
  fn active_views(pet_id: Option<&str>) -> Vec<DocumentQueryKey> {
    let mut views = vec![
      DocumentQueryKey::All,
      DocumentQueryKey::Dashboard,
      DocumentQueryKey::DashboardReal,
    ];
    if let Some(pet_id) = pet_id {
      views.push(DocumentQueryKey::pet(pet_id));
    }
    views
  }

  fn all_views(pet_id: Option<&str>) -> Vec<DocumentQueryKey> {
    let mut views = Self::active_views(pet_id);
    views.push(DocumentQueryKey::Archived);
    views
  }

  /// Put a not-yet-confirmed record at the head of every relevant view.
  ///
  /// Dashboard previews keep their cap: the existing preview is cut to
  /// `limit - 1` entries before the record is prepended.
  pub fn update_optimistic_cache(&self, record: &Document, pet_id: Option<&str>) {
    for view in Self::active_views(pet_id) {
      let keep = if view.is_dashboard() {
        self.dashboard_limit - 1
      } else {
        usize::MAX
      };
      let record = record.clone();
      self.layer.set_data(
        &view.query_key(),
        Box::new(move |existing| {
          let mut next = vec![record];
          next.extend(existing.into_iter().flatten().take(keep).cloned());
          next
        }),
      );
    }
    debug!(id = %record.id, pet_id = ?pet_id, "optimistic record inserted");
  }

  /// Swap a temporary record for the backend's confirmed copy.
  pub fn replace_record(&self, temp_id: &str, confirmed: &Document, pet_id: Option<&str>) {
    for view in Self::active_views(pet_id) {
      let temp_id = temp_id.to_string();
      let confirmed = confirmed.clone();
      self.layer.set_data(
        &view.query_key(),
        Box::new(move |existing| {
          existing
            .into_iter()
            .flatten()
            .map(|doc| {
              if doc.cache_key() == temp_id {
                confirmed.clone()
              } else {
                doc.clone()
              }
            })
            .collect()
        }),
      );
    }
  }

  /// Apply an in-place edit to a record wherever it is cached and mark it pending.
  pub fn update_record<F>(&self, id: &str, pet_id: Option<&str>, edit: F)
  where
    F: Fn(&mut Document) + Clone + Send,
  {
    for view in Self::all_views(pet_id) {
      let id = id.to_string();
      let edit = edit.clone();
      self.layer.set_data(
        &view.query_key(),
        Box::new(move |existing| {
          existing
            .into_iter()
            .flatten()
            .map(|doc| {
              let mut doc = doc.clone();
              if doc.id == id {
                edit(&mut doc);
                doc.sync_state = SyncState::Pending;
              }
              doc
            })
            .collect()
        }),
      );
    }
  }

  /// Drop a record from every view (rollback, delete, archive, restore).
  pub fn remove_record(&self, id: &str, pet_id: Option<&str>) {
    for view in Self::all_views(pet_id) {
      let id = id.to_string();
      self.layer.set_data(
        &view.query_key(),
        Box::new(move |existing| {
          existing
            .into_iter()
            .flatten()
            .filter(|doc| doc.id != id)
            .cloned()
            .collect()
        }),
      );
    }
  }

  /// Mark the document views stale and ask for active ones to be refetched.
  pub fn invalidate_queries(&self, pet_id: Option<&str>) {
    let options = InvalidateOptions {
      exact: true,
      refetch_type: Some(QueryType::Active),
    };
    for view in Self::active_views(pet_id) {
      self.layer.invalidate(&view.query_key(), options);
    }
  }

  /// Refetch the document views now, stale or not.
  ///
  /// An active view already refetching after `invalidate_queries` gets a
  /// new request; the earlier one is superseded and its response dropped.
  /// The superseded request may still reach the backend.
  pub fn refetch_queries(&self, pet_id: Option<&str>) {
    let options = RefetchOptions {
      query_type: QueryType::Active,
      exact: true,
    };
    for view in Self::active_views(pet_id) {
      self.layer.refetch(&view.query_key(), options);
    }
  }

  pub fn invalidate_archived(&self) {
    self.layer.invalidate(
      &DocumentQueryKey::Archived.query_key(),
      InvalidateOptions {
        exact: true,
        refetch_type: Some(QueryType::Active),
      },
    );
  }

  pub fn refetch_archived(&self) {
    self.layer.refetch(
      &DocumentQueryKey::Archived.query_key(),
      RefetchOptions {
        query_type: QueryType::Active,
        exact: true,
      },
    );
  }
}
