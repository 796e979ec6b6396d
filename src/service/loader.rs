use color_eyre::Result;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::debug;

use crate::cache::{CacheKey, CacheLayer};
use crate::documents::cache::DocumentQueryKey;
use crate::documents::{Document, DocumentApi};

/// Loads each document result set, going through the TTL store where the
/// result set has a store partition.
#[derive(Clone)]
pub struct DocumentLoader {
  api: Arc<dyn DocumentApi>,
  cache: CacheLayer<Document>,
  user_id: String,
  dashboard_limit: usize,
}

impl DocumentLoader {
  pub fn new(
    api: Arc<dyn DocumentApi>,
    cache: CacheLayer<Document>,
    user_id: impl Into<String>,
    dashboard_limit: usize,
  ) -> Self {
    Self {
      api,
      cache,
      user_id: user_id.into(),
      dashboard_limit,
    }
  }

  pub async fn load(&self, key: &DocumentQueryKey) -> Result<Vec<Document>> {
    let docs = match key.cache_key() {
      Some(partition) => {
        let result = self
          .cache
          .fetch_list(&partition, || self.fetch(&partition))
          .await?;
        debug!(key = %partition, source = ?result.source, count = result.data.len(), "documents loaded");
        result.data
      }
      None => self.api.fetch_all(&self.user_id).await?,
    };

    if key.is_dashboard() {
      Ok(docs.into_iter().take(self.dashboard_limit).collect())
    } else {
      Ok(docs)
    }
  }

  async fn fetch(&self, partition: &CacheKey) -> Result<Vec<Document>> {
    let user_id = self.user_id.as_str();
    match partition {
      CacheKey::All => self.api.fetch_all(user_id).await,
      CacheKey::Archived => self.api.fetch_archived(user_id).await,
      CacheKey::Pet(pet_id) => self.api.fetch_by_pet(user_id, pet_id).await,
    }
  }

  /// Fetcher for the query client. Errors are flattened to messages.
  pub fn fetcher(
    &self,
    key: DocumentQueryKey,
  ) -> impl Fn() -> BoxFuture<'static, Result<Vec<Document>, String>> + Send + Sync + 'static {
    let loader = self.clone();
    move || {
      let loader = loader.clone();
      let key = key.clone();
      async move { loader.load(&key).await.map_err(|e| e.to_string()) }.boxed()
    }
  }
}
