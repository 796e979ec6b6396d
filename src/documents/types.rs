use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix that marks an identifier as client-generated.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Whether a cached record has been confirmed by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncState {
  /// Record came from (or was confirmed by) the backend
  #[default]
  Confirmed,
  /// Record reflects a local write that has not been reconciled yet
  Pending,
}

/// One uploaded file record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
  pub id: String,
  pub name: String,
  pub category: String,
  pub user_id: String,
  pub pet_id: Option<String>,
  /// Location of the file in object storage
  pub file_url: String,
  pub file_type: String,
  pub is_favorite: bool,
  pub is_archived: bool,
  pub created_at: DateTime<Utc>,
  #[serde(skip)]
  pub sync_state: SyncState,
}

impl Document {
  /// Build the speculative copy shown while an upload is in flight.
  pub fn optimistic(new: &NewDocument, user_id: &str) -> Self {
    Self {
      id: format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4()),
      name: new.name.clone(),
      category: new.category.clone(),
      user_id: user_id.to_string(),
      pet_id: new.pet_id.clone(),
      file_url: new.file_url.clone(),
      file_type: new.file_type.clone(),
      is_favorite: false,
      is_archived: false,
      created_at: Utc::now(),
      sync_state: SyncState::Pending,
    }
  }

  /// True for client-generated identifiers that the backend never issued.
  pub fn is_temporary(&self) -> bool {
    self.id.starts_with(TEMP_ID_PREFIX)
  }

  pub fn is_pending(&self) -> bool {
    self.sync_state == SyncState::Pending
  }

  /// Apply an edit in place.
  pub fn apply(&mut self, patch: &DocumentPatch) {
    if let Some(name) = &patch.name {
      self.name = name.clone();
    }
    if let Some(category) = &patch.category {
      self.category = category.clone();
    }
    if let Some(pet_id) = &patch.pet_id {
      self.pet_id = pet_id.clone();
    }
  }
}

/// Upload payload
#[derive(Debug, Clone)]
pub struct NewDocument {
  pub name: String,
  pub category: String,
  pub pet_id: Option<String>,
  pub file_url: String,
  pub file_type: String,
}

/// Edit payload. `pet_id: Some(None)` removes the pet association.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentPatch {
  pub name: Option<String>,
  pub category: Option<String>,
  pub pet_id: Option<Option<String>>,
}

impl DocumentPatch {
  pub fn is_empty(&self) -> bool {
    self.name.is_none() && self.category.is_none() && self.pet_id.is_none()
  }
}
