//! Document writes with optimistic cache updates.
//!
//! Every write follows the same protocol:
//! 1. Apply the change to cached views and register it as pending
//! 2. Send the authoritative write
//! 3. Commit the backend's copy, or roll the local change back
//! 4. Refresh the affected views, success or not
//! 5. On success, tell other sessions through the storage channel

mod loader;
mod pending;

pub use loader::DocumentLoader;
pub use pending::{PendingKind, PendingWrites};

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::documents::{Document, DocumentApi, DocumentPatch, NewDocument};
use crate::notify::Notifier;
use crate::sync::{CacheOperations, RefreshReason, RefreshScope, Refresher, StorageChannel};

pub struct DocumentService {
  api: Arc<dyn DocumentApi>,
  operations: Arc<CacheOperations>,
  refresher: Arc<dyn Refresher>,
  notifier: Notifier,
  pending: PendingWrites,
  storage: Option<(Arc<dyn StorageChannel>, String)>,
  user_id: String,
}

impl DocumentService {
  pub fn new(
    api: Arc<dyn DocumentApi>,
    operations: Arc<CacheOperations>,
    refresher: Arc<dyn Refresher>,
    notifier: Notifier,
    user_id: impl Into<String>,
  ) -> Self {
    Self {
      api,
      operations,
      refresher,
      notifier,
      pending: PendingWrites::default(),
      storage: None,
      user_id: user_id.into(),
    }
  }

  /// Announce successful writes under `key` on a storage channel.
  pub fn with_storage(mut self, channel: Arc<dyn StorageChannel>, key: impl Into<String>) -> Self {
    self.storage = Some((channel, key.into()));
    self
  }

  pub fn pending(&self) -> &PendingWrites {
    &self.pending
  }

  /// Upload a new document record.
  pub async fn upload(&self, new: NewDocument) -> Result<Document> {
    let optimistic = Document::optimistic(&new, &self.user_id);
    let pet_id = new.pet_id.as_deref();

    self.operations.update_optimistic_cache(&optimistic, pet_id);
    let result = self
      .write(
        &optimistic.id,
        PendingKind::Create,
        &optimistic.name,
        self.api.create(&self.user_id, &new),
      )
      .await;

    match &result {
      Ok(confirmed) => {
        self
          .operations
          .replace_record(&optimistic.id, confirmed, pet_id);
        self.notifier.info(format!("Uploaded {}", confirmed.name));
      }
      Err(_) => self.operations.remove_record(&optimistic.id, pet_id),
    }

    self.finish(result.is_ok(), vec![scope_for(pet_id, false)]);
    result
  }

  /// Change name, category or pet association.
  pub async fn edit(&self, doc: &Document, patch: DocumentPatch) -> Result<Document> {
    ensure_confirmed(doc)?;
    if patch.is_empty() {
      return Ok(doc.clone());
    }

    let old_pet = doc.pet_id.as_deref();
    let local_patch = patch.clone();
    self
      .operations
      .update_record(&doc.id, old_pet, move |d| d.apply(&local_patch));

    let result = self
      .write(&doc.id, PendingKind::Edit, &doc.name, self.api.update(&doc.id, &patch))
      .await;

    if let Ok(confirmed) = &result {
      self.operations.replace_record(&doc.id, confirmed, old_pet);
      self.notifier.info(format!("Saved {}", confirmed.name));
    }

    let mut scopes = vec![scope_for(old_pet, doc.is_archived)];
    if let Some(Some(new_pet)) = &patch.pet_id {
      if Some(new_pet.as_str()) != old_pet {
        scopes.push(RefreshScope::pet(new_pet.as_str()));
      }
    }
    self.finish(result.is_ok(), scopes);
    result
  }

  pub async fn toggle_favorite(&self, doc: &Document) -> Result<Document> {
    ensure_confirmed(doc)?;
    let favorite = !doc.is_favorite;
    let pet_id = doc.pet_id.as_deref();

    self
      .operations
      .update_record(&doc.id, pet_id, move |d| d.is_favorite = favorite);

    let result = self
      .write(
        &doc.id,
        PendingKind::Favorite,
        &doc.name,
        self.api.set_favorite(&doc.id, favorite),
      )
      .await;

    if let Ok(confirmed) = &result {
      self.operations.replace_record(&doc.id, confirmed, pet_id);
    }

    self.finish(result.is_ok(), vec![scope_for(pet_id, doc.is_archived)]);
    result
  }

  pub async fn archive(&self, doc: &Document) -> Result<()> {
    self
      .remove(doc, PendingKind::Archive, self.api.set_archived(&doc.id, true))
      .await?;
    self.notifier.info(format!("Archived {}", doc.name));
    Ok(())
  }

  pub async fn restore(&self, doc: &Document) -> Result<()> {
    self
      .remove(doc, PendingKind::Restore, self.api.set_archived(&doc.id, false))
      .await?;
    self.notifier.info(format!("Restored {}", doc.name));
    Ok(())
  }

  /// Permanently delete a document.
  pub async fn delete(&self, doc: &Document) -> Result<()> {
    self
      .remove(doc, PendingKind::Delete, self.api.delete(&doc.id))
      .await?;
    self.notifier.info(format!("Deleted {}", doc.name));
    Ok(())
  }

  /// Writes whose optimistic effect is taking the record out of its current views.
  async fn remove<Fut>(&self, doc: &Document, kind: PendingKind, write: Fut) -> Result<()>
  where
    Fut: Future<Output = Result<()>>,
  {
    ensure_confirmed(doc)?;
    let pet_id = doc.pet_id.as_deref();

    self.operations.remove_record(&doc.id, pet_id);
    let result = self.write(&doc.id, kind, &doc.name, write).await;

    // Rolling back means refetching: the removed copy is gone from every view
    self.finish(result.is_ok(), vec![scope_for(pet_id, true)]);
    result
  }

  /// Run the authoritative write while it is registered as pending.
  async fn write<T, Fut>(
    &self,
    id: &str,
    kind: PendingKind,
    name: &str,
    write: Fut,
  ) -> Result<T>
  where
    Fut: Future<Output = Result<T>>,
  {
    let token = self.pending.begin(id, kind, name);
    let result = write.await;
    let waited_ms = self
      .pending
      .resolve(token)
      .map(|w| (Utc::now() - w.started_at).num_milliseconds());

    match &result {
      Ok(_) => info!(id, ?kind, ?waited_ms, "write committed"),
      Err(e) => {
        warn!(id, ?kind, error = %e, "write failed, rolling back");
        self.notifier.error(format!("{} failed: {}", kind.label(), e));
      }
    }
    result
  }

  fn finish(&self, succeeded: bool, scopes: Vec<RefreshScope>) {
    for scope in scopes {
      self.refresher.refresh(scope.request(RefreshReason::Mutation));
    }

    if !succeeded {
      return;
    }
    if let Some((channel, key)) = &self.storage {
      if let Err(e) = channel.publish(key) {
        warn!(error = %e, "failed to announce document change");
      }
    }
  }
}

fn scope_for(pet_id: Option<&str>, include_archived: bool) -> RefreshScope {
  RefreshScope {
    pet_id: pet_id.map(String::from),
    include_archived,
  }
}

/// The backend does not know temporary ids yet.
fn ensure_confirmed(doc: &Document) -> Result<()> {
  if doc.is_temporary() {
    return Err(eyre!("Document {} is still uploading", doc.name));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::documents::cache::DocumentQueryKey;
  use crate::documents::memory::{document, MemoryDocumentApi};
  use crate::documents::SyncState;
  use crate::notify::{self, NotificationLevel, NotificationReceiver};
  use crate::sync::testing::{RecordingLayer, RecordingRefresher};
  use crate::sync::{MemoryStorageChannel, StorageSubscription};
  use std::time::Duration;

  struct Harness {
    service: DocumentService,
    api: Arc<MemoryDocumentApi>,
    layer: Arc<RecordingLayer>,
    refresher: Arc<RecordingRefresher>,
    notifications: NotificationReceiver,
    other_tab: StorageSubscription,
  }

  fn harness(docs: Vec<Document>) -> Harness {
    let api = Arc::new(MemoryDocumentApi::with_documents(docs));
    let layer = Arc::new(RecordingLayer::default());
    let ops = Arc::new(CacheOperations::new(layer.clone(), 3));
    let refresher = Arc::new(RecordingRefresher::default());
    let (notifier, notifications) = notify::channel();
    let storage = MemoryStorageChannel::new();
    let other_tab = storage.tab().subscribe();

    let service = DocumentService::new(api.clone(), ops, refresher.clone(), notifier, "u1")
      .with_storage(Arc::new(storage), "document_updated");

    Harness {
      service,
      api,
      layer,
      refresher,
      notifications,
      other_tab,
    }
  }

  fn new_doc(pet_id: Option<&str>) -> NewDocument {
    NewDocument {
      name: "Vaccination record".to_string(),
      category: "vaccination".to_string(),
      pet_id: pet_id.map(String::from),
      file_url: "docs/u1/vacc.pdf".to_string(),
      file_type: "application/pdf".to_string(),
    }
  }

  async fn announced(sub: &mut StorageSubscription) -> bool {
    tokio::time::timeout(Duration::from_millis(50), sub.recv())
      .await
      .map(|e| e.is_some())
      .unwrap_or(false)
  }

  #[tokio::test]
  async fn test_upload_commits_confirmed_record() {
    let mut h = harness(vec![document(1, Some("p1"))]);
    h.layer
      .seed(DocumentQueryKey::pet("p1"), vec![document(1, Some("p1"))]);

    let doc = h.service.upload(new_doc(Some("p1"))).await.unwrap();
    assert!(!doc.is_temporary());

    let pet = h.layer.get(&DocumentQueryKey::pet("p1")).unwrap();
    assert_eq!(pet[0].id, doc.id);
    assert_eq!(pet[0].sync_state, SyncState::Confirmed);
    assert!(pet.iter().all(|d| !d.is_temporary()));

    assert!(h.service.pending().is_empty());
    assert_eq!(h.refresher.count(RefreshReason::Mutation), 1);
    assert_eq!(
      h.refresher.requests()[0].scope.pet_id.as_deref(),
      Some("p1")
    );
    assert!(announced(&mut h.other_tab).await);
    assert_eq!(
      h.notifications.try_recv().unwrap().level,
      NotificationLevel::Info
    );
  }

  #[tokio::test]
  async fn test_failed_upload_rolls_back_and_still_refreshes() {
    let mut h = harness(Vec::new());
    h.layer.seed(DocumentQueryKey::All, vec![document(1, None)]);
    h.api.fail_writes(true);

    let result = h.service.upload(new_doc(None)).await;
    assert!(result.is_err());

    let all = h.layer.get(&DocumentQueryKey::All).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, "d1");

    assert!(h.service.pending().is_empty());
    assert_eq!(h.refresher.count(RefreshReason::Mutation), 1);
    assert!(!announced(&mut h.other_tab).await);
    assert_eq!(
      h.notifications.try_recv().unwrap().level,
      NotificationLevel::Error
    );
  }

  #[tokio::test]
  async fn test_toggle_favorite() {
    let h = harness(vec![document(1, None)]);
    h.layer.seed(DocumentQueryKey::All, vec![document(1, None)]);

    let doc = h.service.toggle_favorite(&document(1, None)).await.unwrap();
    assert!(doc.is_favorite);
    assert!(h.api.rows()[0].is_favorite);

    let all = h.layer.get(&DocumentQueryKey::All).unwrap();
    assert!(all[0].is_favorite);
    assert_eq!(all[0].sync_state, SyncState::Confirmed);
  }

  #[tokio::test]
  async fn test_failed_edit_leaves_pending_copy_for_refetch() {
    let h = harness(vec![document(1, None)]);
    h.layer.seed(DocumentQueryKey::All, vec![document(1, None)]);
    h.api.fail_writes(true);

    let patch = DocumentPatch {
      name: Some("Renamed".to_string()),
      ..Default::default()
    };
    assert!(h.service.edit(&document(1, None), patch).await.is_err());

    // The refresh that follows overwrites this copy with the backend's
    let all = h.layer.get(&DocumentQueryKey::All).unwrap();
    assert_eq!(all[0].sync_state, SyncState::Pending);
    assert_eq!(h.refresher.count(RefreshReason::Mutation), 1);
    assert_eq!(h.api.rows()[0].name, "Document 1");
  }

  #[tokio::test]
  async fn test_moving_to_another_pet_refreshes_both() {
    let h = harness(vec![document(1, Some("p1"))]);
    let patch = DocumentPatch {
      pet_id: Some(Some("p2".to_string())),
      ..Default::default()
    };

    h.service
      .edit(&document(1, Some("p1")), patch)
      .await
      .unwrap();

    let pets: Vec<_> = h
      .refresher
      .requests()
      .into_iter()
      .map(|r| r.scope.pet_id)
      .collect();
    assert_eq!(pets, vec![Some("p1".to_string()), Some("p2".to_string())]);
  }

  #[tokio::test]
  async fn test_archive_removes_and_refreshes_archived_view() {
    let mut h = harness(vec![document(1, None), document(2, None)]);
    h.layer
      .seed(DocumentQueryKey::All, vec![document(2, None), document(1, None)]);

    h.service.archive(&document(2, None)).await.unwrap();

    let all = h.layer.get(&DocumentQueryKey::All).unwrap();
    assert_eq!(all.len(), 1);
    assert!(h.refresher.requests()[0].scope.include_archived);
    assert!(h.api.rows().iter().any(|d| d.id == "d2" && d.is_archived));
    assert!(announced(&mut h.other_tab).await);
  }

  #[tokio::test]
  async fn test_delete_unknown_document_fails() {
    let h = harness(Vec::new());
    let result = h.service.delete(&document(7, None)).await;
    assert!(result.is_err());
    assert_eq!(h.refresher.count(RefreshReason::Mutation), 1);
  }

  #[tokio::test]
  async fn test_overlapping_writes_are_tracked_separately() {
    let h = harness(Vec::new());
    let (release_rename, rename_done) = tokio::sync::oneshot::channel::<()>();
    let (release_favorite, favorite_done) = tokio::sync::oneshot::channel::<()>();

    let rename = h.service.write("d1", PendingKind::Edit, "Vaccination", async {
      rename_done.await.map_err(|e| eyre!("{}", e))
    });
    let favorite = h.service.write("d1", PendingKind::Favorite, "Vaccination", async {
      favorite_done.await.map_err(|e| eyre!("{}", e))
    });
    let pending = h.service.pending();
    let check = async {
      while pending.snapshot().len() < 2 {
        tokio::task::yield_now().await;
      }
      release_rename.send(()).unwrap();
      while pending.snapshot().len() > 1 {
        tokio::task::yield_now().await;
      }
      let left = pending.snapshot();
      assert_eq!(left[0].id, "d1");
      assert_eq!(left[0].kind, PendingKind::Favorite);
      release_favorite.send(()).unwrap();
    };

    let (renamed, favorited, _) = tokio::join!(rename, favorite, check);
    assert!(renamed.is_ok());
    assert!(favorited.is_ok());
    assert!(pending.is_empty());
  }

  #[tokio::test]
  async fn test_temporary_records_cannot_be_modified() {
    let h = harness(Vec::new());
    let optimistic = Document::optimistic(&new_doc(None), "u1");

    assert!(h.service.archive(&optimistic).await.is_err());
    assert!(h.service.toggle_favorite(&optimistic).await.is_err());
    assert_eq!(h.refresher.total(), 0);
  }
}
