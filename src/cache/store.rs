//! In-memory TTL store for document collections.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::traits::Cacheable;

/// Source of the current time, injectable so expiry can be tested.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Partition of the cached document space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
  /// Every active document of the user
  All,
  /// Archived documents only
  Archived,
  /// Documents attached to one pet
  Pet(String),
}

impl CacheKey {
  pub fn pet(id: impl Into<String>) -> Self {
    Self::Pet(id.into())
  }

  pub fn is_pet(&self) -> bool {
    matches!(self, Self::Pet(_))
  }
}

impl From<&str> for CacheKey {
  fn from(key: &str) -> Self {
    match key {
      "all" => Self::All,
      "archived" => Self::Archived,
      pet => Self::Pet(pet.to_string()),
    }
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::All => write!(f, "all"),
      Self::Archived => write!(f, "archived"),
      Self::Pet(id) => write!(f, "{}", id),
    }
  }
}

/// A cached collection and the time it was written.
#[derive(Debug, Clone)]
struct CacheEntry<T> {
  data: Vec<T>,
  cached_at: DateTime<Utc>,
}

/// Keyed collection cache with lazy time-to-live expiry.
///
/// An entry is valid while `now - cached_at <= ttl`; expired entries read as
/// absent and are dropped on that read. There is no background sweep.
pub struct CacheStore<T> {
  entries: Mutex<HashMap<CacheKey, CacheEntry<T>>>,
  ttl: Duration,
  clock: Arc<dyn Clock>,
}

impl<T: Cacheable> CacheStore<T> {
  pub fn new(ttl: Duration) -> Self {
    Self::with_clock(ttl, Arc::new(SystemClock))
  }

  pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      ttl,
      clock,
    }
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry<T>>> {
    // Every mutation leaves the map consistent, so a poisoned lock is still usable.
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Overwrite the entry for `key`. Last writer wins.
  pub fn put(&self, data: Vec<T>, key: &CacheKey) {
    let cached_at = self.clock.now();
    debug!(key = %key, count = data.len(), entity = T::entity_type(), "cache put");
    self.entries().insert(key.clone(), CacheEntry { data, cached_at });
  }

  /// Cached collection for `key`, or `None` when missing or expired.
  ///
  /// An empty collection is a hit, distinct from `None`.
  pub fn get(&self, key: &CacheKey) -> Option<Vec<T>> {
    let now = self.clock.now();
    let mut entries = self.entries();

    let expired = match entries.get(key) {
      Some(entry) => now - entry.cached_at > self.ttl,
      None => {
        debug!(key = %key, "cache miss");
        return None;
      }
    };

    if expired {
      debug!(key = %key, "cache entry expired");
      entries.remove(key);
      return None;
    }

    entries.get(key).map(|entry| entry.data.clone())
  }

  /// Remove one entry, or every entry when `key` is `None`.
  pub fn clear(&self, key: Option<&CacheKey>) {
    let mut entries = self.entries();
    match key {
      Some(key) => {
        entries.remove(key);
      }
      None => entries.clear(),
    }
  }

  /// Drop `All` plus either one pet partition or all of them.
  ///
  /// The `Archived` partition is never touched here.
  pub fn invalidate_documents(&self, pet_id: Option<&str>) {
    let mut entries = self.entries();
    entries.remove(&CacheKey::All);
    match pet_id {
      Some(pet_id) => {
        entries.remove(&CacheKey::pet(pet_id));
      }
      None => entries.retain(|key, _| !key.is_pet()),
    }
    debug!(pet_id = ?pet_id, "document caches invalidated");
  }
}
