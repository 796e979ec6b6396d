//! Cache layer that orchestrates caching logic with network fetching.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::store::{CacheKey, CacheStore};
use super::traits::{CacheResult, Cacheable};

/// Cache-first loader over a [`CacheStore`].
///
/// This layer sits between the query fetchers and the network client so
/// repeated reads within the time-to-live never leave the process.
pub struct CacheLayer<T> {
  store: Arc<CacheStore<T>>,
}

impl<T: Cacheable> CacheLayer<T> {
  pub fn new(store: Arc<CacheStore<T>>) -> Self {
    Self { store }
  }

  /// Fetch a list with cache-first strategy.
  ///
  /// 1. Check cache - if present and within TTL, return immediately
  /// 2. Otherwise fetch from network
  /// 3. Store the fetched collection under `key`
  ///
  /// Network errors propagate; nothing is written on failure.
  pub async fn fetch_list<F, Fut>(&self, key: &CacheKey, fetcher: F) -> Result<CacheResult<Vec<T>>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    if let Some(cached) = self.store.get(key) {
      debug!(key = %key, "serving collection from cache");
      return Ok(CacheResult::from_cache(cached));
    }

    let data = fetcher().await?;
    self.store.put(data.clone(), key);
    Ok(CacheResult::from_network(data))
  }
}

impl<T> Clone for CacheLayer<T> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
    }
  }
}
