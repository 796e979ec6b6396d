//! Caching implementations for document types.

use crate::cache::{CacheKey, Cacheable};
use crate::query::QueryKey;

use super::types::Document;

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for Document {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "document"
  }
}

// ============================================================================
// Query key types
// ============================================================================

/// Result sets that views keep in the query client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocumentQueryKey {
  /// Every active document
  All,
  /// Dashboard preview backed by the local store
  Dashboard,
  /// Dashboard preview read straight from the backend
  DashboardReal,
  /// Archived documents
  Archived,
  /// Documents of one pet
  Pet { pet_id: String },
}

impl DocumentQueryKey {
  pub fn pet(pet_id: impl Into<String>) -> Self {
    Self::Pet {
      pet_id: pet_id.into(),
    }
  }

  /// Key of the query-client entry.
  pub fn query_key(&self) -> QueryKey {
    match self {
      Self::All => QueryKey::new(["documents"]),
      Self::Dashboard => QueryKey::new(["dashboard-documents"]),
      Self::DashboardReal => QueryKey::new(["dashboard-documents-real"]),
      Self::Archived => QueryKey::new(["archived-documents"]),
      Self::Pet { pet_id } => QueryKey::new(["pet-documents", pet_id.as_str()]),
    }
  }

  /// Partition of the TTL store this result set is loaded through.
  pub fn cache_key(&self) -> Option<CacheKey> {
    match self {
      Self::All | Self::Dashboard => Some(CacheKey::All),
      Self::Archived => Some(CacheKey::Archived),
      Self::Pet { pet_id } => Some(CacheKey::pet(pet_id.as_str())),
      Self::DashboardReal => None,
    }
  }

  /// Whether the view holds a capped preview rather than a full collection.
  pub fn is_dashboard(&self) -> bool {
    matches!(self, Self::Dashboard | Self::DashboardReal)
  }

  pub fn description(&self) -> String {
    match self {
      Self::All => "all documents".to_string(),
      Self::Dashboard | Self::DashboardReal => "recent documents".to_string(),
      Self::Archived => "archived documents".to_string(),
      Self::Pet { pet_id } => format!("documents for pet {}", pet_id),
    }
  }
}
