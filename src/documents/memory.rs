//! In-memory `DocumentApi` used by tests.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::client::DocumentApi;
use super::types::{Document, DocumentPatch, NewDocument, SyncState};

#[derive(Default)]
pub struct MemoryDocumentApi {
  rows: Mutex<Vec<Document>>,
  next_id: AtomicUsize,
  fail_writes: AtomicBool,
  fail_reads: AtomicBool,
  fetches: AtomicUsize,
}

impl MemoryDocumentApi {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_documents(documents: Vec<Document>) -> Self {
    let api = Self::new();
    *api.rows.lock().unwrap() = documents;
    api
  }

  pub fn fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  pub fn fail_reads(&self, fail: bool) {
    self.fail_reads.store(fail, Ordering::SeqCst);
  }

  /// Number of collection reads served so far
  pub fn fetch_count(&self) -> usize {
    self.fetches.load(Ordering::SeqCst)
  }

  pub fn rows(&self) -> Vec<Document> {
    self.rows.lock().unwrap().clone()
  }

  fn read(&self, filter: impl Fn(&Document) -> bool) -> Result<Vec<Document>> {
    self.fetches.fetch_add(1, Ordering::SeqCst);
    if self.fail_reads.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to fetch documents: connection refused"));
    }
    let mut docs: Vec<Document> = self
      .rows
      .lock()
      .unwrap()
      .iter()
      .filter(|d| filter(d))
      .cloned()
      .collect();
    docs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(docs)
  }

  fn check_write(&self) -> Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to write document: storage unavailable"));
    }
    Ok(())
  }

  fn modify(&self, id: &str, f: impl FnOnce(&mut Document)) -> Result<Document> {
    self.check_write()?;
    let mut rows = self.rows.lock().unwrap();
    let doc = rows
      .iter_mut()
      .find(|d| d.id == id)
      .ok_or_else(|| eyre!("Document {} not found", id))?;
    f(doc);
    Ok(doc.clone())
  }
}

#[async_trait]
impl DocumentApi for MemoryDocumentApi {
  async fn fetch_all(&self, user_id: &str) -> Result<Vec<Document>> {
    self.read(|d| d.user_id == user_id && !d.is_archived)
  }

  async fn fetch_archived(&self, user_id: &str) -> Result<Vec<Document>> {
    self.read(|d| d.user_id == user_id && d.is_archived)
  }

  async fn fetch_by_pet(&self, user_id: &str, pet_id: &str) -> Result<Vec<Document>> {
    self.read(|d| d.user_id == user_id && !d.is_archived && d.pet_id.as_deref() == Some(pet_id))
  }

  async fn create(&self, user_id: &str, new: &NewDocument) -> Result<Document> {
    self.check_write()?;
    let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    let doc = Document {
      id: format!("doc-{}", n),
      name: new.name.clone(),
      category: new.category.clone(),
      user_id: user_id.to_string(),
      pet_id: new.pet_id.clone(),
      file_url: new.file_url.clone(),
      file_type: new.file_type.clone(),
      is_favorite: false,
      is_archived: false,
      created_at: Utc::now(),
      sync_state: SyncState::Confirmed,
    };
    self.rows.lock().unwrap().push(doc.clone());
    Ok(doc)
  }

  async fn update(&self, id: &str, patch: &DocumentPatch) -> Result<Document> {
    self.modify(id, |d| d.apply(patch))
  }

  async fn set_favorite(&self, id: &str, favorite: bool) -> Result<Document> {
    self.modify(id, |d| d.is_favorite = favorite)
  }

  async fn set_archived(&self, id: &str, archived: bool) -> Result<()> {
    self.modify(id, |d| d.is_archived = archived).map(|_| ())
  }

  async fn delete(&self, id: &str) -> Result<()> {
    self.check_write()?;
    let mut rows = self.rows.lock().unwrap();
    let before = rows.len();
    rows.retain(|d| d.id != id);
    if rows.len() == before {
      return Err(eyre!("Document {} not found", id));
    }
    Ok(())
  }
}

/// Confirmed document fixture; higher `n` is newer.
pub fn document(n: u32, pet_id: Option<&str>) -> Document {
  Document {
    id: format!("d{}", n),
    name: format!("Document {}", n),
    category: "medical".to_string(),
    user_id: "u1".to_string(),
    pet_id: pet_id.map(String::from),
    file_url: format!("docs/u1/{}.pdf", n),
    file_type: "application/pdf".to_string(),
    is_favorite: false,
    is_archived: false,
    created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(n as i64),
    sync_state: SyncState::Confirmed,
  }
}
