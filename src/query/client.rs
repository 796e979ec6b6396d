//! Keyed query cache shared by every view.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use super::Query;
use crate::notify::Notifier;

/// Hierarchical query key, e.g. `["pet-documents", "p1"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
  pub fn new<I, S>(parts: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self(parts.into_iter().map(Into::into).collect())
  }

  /// Exact filters match equal keys; others match any key they prefix.
  pub fn matches(&self, filter: &QueryKey, exact: bool) -> bool {
    if exact {
      self == filter
    } else {
      self.0.starts_with(&filter.0)
    }
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}]", self.0.join(", "))
  }
}

/// Which queries an operation applies to, by observer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
  /// Queries with at least one mounted observer
  Active,
  /// Queries nobody observes right now
  Inactive,
  All,
}

impl QueryType {
  fn includes(self, observers: usize) -> bool {
    match self {
      QueryType::Active => observers > 0,
      QueryType::Inactive => observers == 0,
      QueryType::All => true,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidateOptions {
  pub exact: bool,
  /// Which invalidated queries to refetch right away; `None` only marks them stale
  pub refetch_type: Option<QueryType>,
}

impl Default for InvalidateOptions {
  fn default() -> Self {
    Self {
      exact: false,
      refetch_type: Some(QueryType::Active),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefetchOptions {
  pub query_type: QueryType,
  pub exact: bool,
}

impl Default for RefetchOptions {
  fn default() -> Self {
    Self {
      query_type: QueryType::All,
      exact: false,
    }
  }
}

/// Boxed data updater passed through [`QueryLayer::set_data`].
pub type Updater<'a, T> = Box<dyn FnOnce(Option<&T>) -> T + Send + 'a>;

/// The operations cache mutations are allowed to issue against query results.
pub trait QueryLayer<T>: Send + Sync {
  /// Replace the data under `key` with the updater's result.
  fn set_data(&self, key: &QueryKey, updater: Updater<'_, T>);

  /// Mark matching results stale and optionally refetch them.
  fn invalidate(&self, key: &QueryKey, options: InvalidateOptions);

  /// Refetch matching results now, regardless of staleness.
  fn refetch(&self, key: &QueryKey, options: RefetchOptions);
}

/// A query result that changed during [`QueryClient::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryUpdate {
  pub key: QueryKey,
  /// Set when the fetch failed
  pub error: Option<String>,
}

struct QueryEntry<T> {
  query: Query<T>,
  observers: usize,
}

/// Keyed collection of queries with observer tracking.
pub struct QueryClient<T> {
  queries: Arc<Mutex<HashMap<QueryKey, QueryEntry<T>>>>,
  stale_time: Duration,
  notifier: Option<Notifier>,
}

impl<T> Clone for QueryClient<T> {
  fn clone(&self) -> Self {
    Self {
      queries: Arc::clone(&self.queries),
      stale_time: self.stale_time,
      notifier: self.notifier.clone(),
    }
  }
}

impl<T: Clone + Send + 'static> Default for QueryClient<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Clone + Send + 'static> QueryClient<T> {
  pub fn new() -> Self {
    Self {
      queries: Arc::new(Mutex::new(HashMap::new())),
      stale_time: Duration::from_secs(60),
      notifier: None,
    }
  }

  /// Stale time applied to queries created by this client.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// Report failed fetches as error notifications.
  pub fn with_notifier(mut self, notifier: Notifier) -> Self {
    self.notifier = Some(notifier);
    self
  }

  fn queries(&self) -> MutexGuard<'_, HashMap<QueryKey, QueryEntry<T>>> {
    self.queries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn entry<'a>(
    &self,
    queries: &'a mut HashMap<QueryKey, QueryEntry<T>>,
    key: &QueryKey,
  ) -> &'a mut QueryEntry<T> {
    let stale_time = self.stale_time;
    queries.entry(key.clone()).or_insert_with(|| QueryEntry {
      query: Query::empty().with_stale_time(stale_time),
      observers: 0,
    })
  }

  /// Subscribe to `key`, fetching if there is no fresh data yet.
  ///
  /// The query stays active until the returned observer is dropped.
  pub fn observe<F, Fut>(&self, key: QueryKey, fetcher: F) -> QueryObserver<T>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    {
      let mut queries = self.queries();
      let entry = self.entry(&mut queries, &key);
      entry.query.set_fetcher(fetcher);
      entry.observers += 1;
      if entry.query.data().is_none() || entry.query.is_stale() {
        entry.query.fetch();
      }
      debug!(key = %key, observers = entry.observers, "query observed");
    }

    QueryObserver {
      client: self.clone(),
      key,
    }
  }

  fn unobserve(&self, key: &QueryKey) {
    if let Some(entry) = self.queries().get_mut(key) {
      entry.observers = entry.observers.saturating_sub(1);
      debug!(key = %key, observers = entry.observers, "query observer dropped");
    }
  }

  /// Write data under `key`, creating the query if needed.
  pub fn set_query_data<F>(&self, key: &QueryKey, updater: F)
  where
    F: FnOnce(Option<&T>) -> T,
  {
    let mut queries = self.queries();
    self.entry(&mut queries, key).query.set_data(updater);
  }

  pub fn get_query_data(&self, key: &QueryKey) -> Option<T> {
    self.queries().get(key).and_then(|e| e.query.data().cloned())
  }

  #[cfg(test)]
  pub fn is_stale(&self, key: &QueryKey) -> bool {
    self
      .queries()
      .get(key)
      .map(|e| e.query.is_stale())
      .unwrap_or(true)
  }

  #[cfg(test)]
  pub fn observer_count(&self, key: &QueryKey) -> usize {
    self.queries().get(key).map(|e| e.observers).unwrap_or(0)
  }

  /// Mark matching queries stale, then refetch those selected by `refetch_type`.
  ///
  /// A following `refetch_queries` on the same keys supersedes these fetches.
  /// Returns the number of fetches started.
  pub fn invalidate_queries(&self, filter: &QueryKey, options: InvalidateOptions) -> usize {
    let mut queries = self.queries();
    let mut started = 0;
    for (key, entry) in queries.iter_mut() {
      if !key.matches(filter, options.exact) {
        continue;
      }
      entry.query.invalidate();
      if let Some(query_type) = options.refetch_type {
        if query_type.includes(entry.observers) && entry.query.refetch() {
          started += 1;
        }
      }
    }
    debug!(filter = %filter, started, "queries invalidated");
    started
  }

  /// Refetch matching queries, dropping any response still in flight.
  ///
  /// Returns the number of fetches started.
  pub fn refetch_queries(&self, filter: &QueryKey, options: RefetchOptions) -> usize {
    let mut queries = self.queries();
    let mut started = 0;
    for (key, entry) in queries.iter_mut() {
      if key.matches(filter, options.exact)
        && options.query_type.includes(entry.observers)
        && entry.query.refetch()
      {
        started += 1;
      }
    }
    debug!(filter = %filter, started, "queries refetched");
    started
  }

  /// Collect finished fetches. Call this on every tick.
  pub fn poll(&self) -> Vec<QueryUpdate> {
    let mut updates = Vec::new();
    for (key, entry) in self.queries().iter_mut() {
      if !entry.query.poll() {
        continue;
      }
      let error = entry.query.error().map(String::from);
      if let Some(error) = &error {
        warn!(key = %key, error = %error, "query fetch failed");
        if let Some(notifier) = &self.notifier {
          notifier.error(format!("Could not refresh {}: {}", key, error));
        }
      }
      updates.push(QueryUpdate {
        key: key.clone(),
        error,
      });
    }
    updates
  }
}

impl<T: Clone + Send + 'static> QueryLayer<T> for QueryClient<T> {
  fn set_data(&self, key: &QueryKey, updater: Updater<'_, T>) {
    self.set_query_data(key, updater);
  }

  fn invalidate(&self, key: &QueryKey, options: InvalidateOptions) {
    self.invalidate_queries(key, options);
  }

  fn refetch(&self, key: &QueryKey, options: RefetchOptions) {
    self.refetch_queries(key, options);
  }
}

/// Mounted subscription to one query. Dropping it deactivates the query.
pub struct QueryObserver<T: Clone + Send + 'static> {
  client: QueryClient<T>,
  key: QueryKey,
}

impl<T: Clone + Send + 'static> QueryObserver<T> {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn data(&self) -> Option<T> {
    self.client.get_query_data(&self.key)
  }
}

impl<T: Clone + Send + 'static> Drop for QueryObserver<T> {
  fn drop(&mut self) {
    self.client.unobserve(&self.key);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::notify::{self, NotificationLevel};
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn counting_fetcher(
    calls: Arc<AtomicUsize>,
    value: i32,
  ) -> impl Fn() -> futures::future::Ready<Result<i32, String>> + Send + Sync + 'static {
    move || {
      calls.fetch_add(1, Ordering::SeqCst);
      futures::future::ready(Ok(value))
    }
  }

  async fn settle(client: &QueryClient<i32>) -> Vec<QueryUpdate> {
    tokio::time::sleep(Duration::from_millis(10)).await;
    client.poll()
  }

  #[test]
  fn test_key_matching() {
    let pet = QueryKey::new(["pet-documents", "p1"]);
    assert!(pet.matches(&QueryKey::new(["pet-documents"]), false));
    assert!(!pet.matches(&QueryKey::new(["pet-documents"]), true));
    assert!(pet.matches(&QueryKey::new(["pet-documents", "p1"]), true));
    assert!(!QueryKey::new(["documents"]).matches(&pet, false));
    assert_eq!(pet.to_string(), "[pet-documents, p1]");
  }

  #[tokio::test]
  async fn test_observe_fetches_and_tracks_observers() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = QueryKey::new(["documents"]);

    let observer = client.observe(key.clone(), counting_fetcher(calls.clone(), 5));
    assert_eq!(client.observer_count(&key), 1);

    let updates = settle(&client).await;
    assert_eq!(updates.len(), 1);
    assert_eq!(observer.data(), Some(5));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Fresh data: a second observer does not fetch again
    let second = client.observe(key.clone(), counting_fetcher(calls.clone(), 5));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.observer_count(&key), 2);

    drop(second);
    drop(observer);
    assert_eq!(client.observer_count(&key), 0);
  }

  #[tokio::test]
  async fn test_invalidate_refetches_only_active() {
    let client = QueryClient::new();
    let active_calls = Arc::new(AtomicUsize::new(0));
    let inactive_calls = Arc::new(AtomicUsize::new(0));

    let _active = client.observe(
      QueryKey::new(["pet-documents", "p1"]),
      counting_fetcher(active_calls.clone(), 1),
    );
    let inactive = client.observe(
      QueryKey::new(["pet-documents", "p2"]),
      counting_fetcher(inactive_calls.clone(), 2),
    );
    drop(inactive);
    settle(&client).await;

    let started = client.invalidate_queries(
      &QueryKey::new(["pet-documents"]),
      InvalidateOptions::default(),
    );
    assert_eq!(started, 1);
    assert_eq!(active_calls.load(Ordering::SeqCst), 2);
    assert_eq!(inactive_calls.load(Ordering::SeqCst), 1);
    // The inactive query is still marked stale
    assert!(client.is_stale(&QueryKey::new(["pet-documents", "p2"])));
  }

  #[tokio::test]
  async fn test_invalidate_without_refetch() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = QueryKey::new(["documents"]);
    let _observer = client.observe(key.clone(), counting_fetcher(calls.clone(), 1));
    settle(&client).await;

    let started = client.invalidate_queries(
      &key,
      InvalidateOptions {
        exact: true,
        refetch_type: None,
      },
    );
    assert_eq!(started, 0);
    assert!(client.is_stale(&key));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_refetch_after_invalidate_supersedes_its_fetch() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = QueryKey::new(["documents"]);

    let counter = calls.clone();
    let observer = client.observe(key.clone(), move || {
      let n = counter.fetch_add(1, Ordering::SeqCst) as i32;
      futures::future::ready(Ok(n))
    });
    settle(&client).await;
    assert_eq!(observer.data(), Some(0));

    client.invalidate_queries(&key, InvalidateOptions::default());
    client.refetch_queries(&key, RefetchOptions::default());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Only the last request's response is applied
    let updates = settle(&client).await;
    assert_eq!(updates.len(), 1);
    assert_eq!(observer.data(), Some(2));
    assert!(client.poll().is_empty());
  }

  #[tokio::test]
  async fn test_refetch_respects_type_filter() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = QueryKey::new(["archived-documents"]);
    drop(client.observe(key.clone(), counting_fetcher(calls.clone(), 1)));
    settle(&client).await;

    let active = RefetchOptions {
      query_type: QueryType::Active,
      exact: true,
    };
    assert_eq!(client.refetch_queries(&key, active), 0);

    let inactive = RefetchOptions {
      query_type: QueryType::Inactive,
      exact: true,
    };
    assert_eq!(client.refetch_queries(&key, inactive), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_set_data_creates_missing_query() {
    let client: QueryClient<Vec<i32>> = QueryClient::new();
    let key = QueryKey::new(["dashboard-documents"]);

    client.set_query_data(&key, |old| {
      assert!(old.is_none());
      vec![1, 2]
    });
    assert_eq!(client.get_query_data(&key), Some(vec![1, 2]));
    assert!(!client.is_stale(&key));

    // No fetcher: refetch starts nothing
    assert_eq!(client.refetch_queries(&key, RefetchOptions::default()), 0);
  }

  #[tokio::test]
  async fn test_failed_refetch_keeps_data_and_notifies() {
    let (notifier, mut notifications) = notify::channel();
    let client = QueryClient::new().with_notifier(notifier);
    let key = QueryKey::new(["documents"]);
    let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let fail_clone = fail.clone();
    let _observer = client.observe(key.clone(), move || {
      let fail = fail_clone.load(Ordering::SeqCst);
      async move {
        if fail {
          Err("backend unavailable".to_string())
        } else {
          Ok(9)
        }
      }
    });
    settle(&client).await;

    fail.store(true, Ordering::SeqCst);
    client.refetch_queries(&key, RefetchOptions::default());
    let updates = settle(&client).await;

    assert_eq!(updates[0].error.as_deref(), Some("backend unavailable"));
    assert_eq!(client.get_query_data(&key), Some(9));

    let toast = notifications.try_recv().unwrap();
    assert_eq!(toast.level, NotificationLevel::Error);
    assert!(toast.message.contains("backend unavailable"));
  }
}
