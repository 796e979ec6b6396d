//! Serde types matching the backend's `documents` table rows.
//!
//! These types are separate from domain types so nullable columns and
//! request bodies stay out of the rest of the application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Document, DocumentPatch, NewDocument, SyncState};

// ============================================================================
// Rows returned by select / insert / update
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiDocumentRow {
  pub id: String,
  #[serde(default)]
  pub name: String,
  pub category: Option<String>,
  pub user_id: String,
  pub pet_id: Option<String>,
  #[serde(default)]
  pub file_url: String,
  pub file_type: Option<String>,
  pub is_favorite: Option<bool>,
  pub is_archived: Option<bool>,
  pub created_at: DateTime<Utc>,
}

impl From<ApiDocumentRow> for Document {
  fn from(row: ApiDocumentRow) -> Self {
    Self {
      id: row.id,
      name: row.name,
      category: row.category.unwrap_or_else(|| "other".to_string()),
      user_id: row.user_id,
      pet_id: row.pet_id,
      file_url: row.file_url,
      file_type: row
        .file_type
        .unwrap_or_else(|| "application/octet-stream".to_string()),
      is_favorite: row.is_favorite.unwrap_or(false),
      is_archived: row.is_archived.unwrap_or(false),
      created_at: row.created_at,
      sync_state: SyncState::Confirmed,
    }
  }
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiDocumentInsert<'a> {
  pub name: &'a str,
  pub category: &'a str,
  pub user_id: &'a str,
  pub pet_id: Option<&'a str>,
  pub file_url: &'a str,
  pub file_type: &'a str,
}

impl<'a> ApiDocumentInsert<'a> {
  pub fn new(new: &'a NewDocument, user_id: &'a str) -> Self {
    Self {
      name: &new.name,
      category: &new.category,
      user_id,
      pet_id: new.pet_id.as_deref(),
      file_url: &new.file_url,
      file_type: &new.file_type,
    }
  }
}

/// Partial update; absent fields are left untouched by the backend.
#[derive(Debug, Default, Serialize)]
pub struct ApiDocumentUpdate<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub pet_id: Option<Option<&'a str>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub is_favorite: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub is_archived: Option<bool>,
}

impl<'a> From<&'a DocumentPatch> for ApiDocumentUpdate<'a> {
  fn from(patch: &'a DocumentPatch) -> Self {
    Self {
      name: patch.name.as_deref(),
      category: patch.category.as_deref(),
      pet_id: patch.pet_id.as_ref().map(|p| p.as_deref()),
      ..Default::default()
    }
  }
}
