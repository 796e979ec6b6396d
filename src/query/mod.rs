//! Async query abstraction for data fetching with caching support.
//!
//! Inspired by TanStack Query, this module provides a `Query<T>` type that
//! encapsulates async data fetching, loading states, and error handling, and a
//! keyed [`QueryClient`] that views share.
//!
//! # Example
//!
//! ```ignore
//! let api = api.clone();
//! let mut query = Query::new(move || {
//!     let api = api.clone();
//!     async move { api.fetch_all("user-1").await.map_err(|e| e.to_string()) }
//! });
//!
//! // Start fetching
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, redraw
//! }
//! ```

mod client;

#[cfg(test)]
pub use client::Updater;
pub use client::{
  InvalidateOptions, QueryClient, QueryKey, QueryLayer, QueryObserver, QueryType, RefetchOptions,
};

use futures::future::BoxFuture;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// The fetch status of a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Last fetch (or manual write) succeeded
  Success,
  /// Last fetch failed; previously fetched data is kept
  Error(String),
}

impl QueryState {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, String>> + Send + Sync>;

/// Async query for data fetching with state management.
///
/// Query<T> encapsulates:
/// - The fetching logic (via a closure), optional for queries that only
///   ever receive manual writes
/// - Loading/success/error states
/// - Async result handling via channels
/// - Stale tracking through a stale time and explicit invalidation
pub struct Query<T> {
  state: QueryState,
  data: Option<T>,
  fetcher: Option<FetcherFn<T>>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, String>>>,
  fetched_at: Option<Instant>,
  stale_time: Duration,
  invalidated: bool,
}

impl<T: Send + 'static> Query<T> {
  /// Create a new query with the given fetcher function.
  ///
  /// The fetcher is a closure that returns a future. It will be called
  /// each time `fetch()` or `refetch()` is invoked.
  #[cfg(test)]
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    let mut query = Self::empty();
    query.set_fetcher(fetcher);
    query
  }

  /// Create a query without a fetcher. It only holds data written via `set_data`.
  pub fn empty() -> Self {
    Self {
      state: QueryState::Idle,
      data: None,
      fetcher: None,
      receiver: None,
      fetched_at: None,
      stale_time: Duration::from_secs(60), // Default 1 minute
      invalidated: false,
    }
  }

  /// Set the stale time for this query.
  ///
  /// After this duration, the data is considered stale and `is_stale()` returns true.
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  /// Install or replace the fetcher.
  pub fn set_fetcher<F, Fut>(&mut self, fetcher: F)
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    self.fetcher = Some(Box::new(
      move || -> BoxFuture<'static, Result<T, String>> { Box::pin(fetcher()) },
    ));
  }

  /// Get the current state of the query.
  #[cfg(test)]
  pub fn state(&self) -> &QueryState {
    &self.state
  }

  /// Latest data, kept across failed refetches.
  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  /// Get the error message if the last fetch failed.
  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// Check if the data is stale (invalidated, never fetched, or older than stale_time).
  pub fn is_stale(&self) -> bool {
    if self.invalidated {
      return true;
    }
    self
      .fetched_at
      .map(|t| t.elapsed() > self.stale_time)
      .unwrap_or(true)
  }

  /// Mark the data as stale without fetching.
  pub fn invalidate(&mut self) {
    self.invalidated = true;
  }

  /// Replace the data with the updater's result.
  ///
  /// The updater receives the current data (or `None`).
  pub fn set_data<F>(&mut self, updater: F)
  where
    F: FnOnce(Option<&T>) -> T,
  {
    let next = updater(self.data.as_ref());
    self.data = Some(next);
    self.fetched_at = Some(Instant::now());
    if !self.state.is_loading() {
      self.state = QueryState::Success;
    }
  }

  /// Start fetching data if not already loading.
  ///
  /// This is a no-op if the query is already loading or has no fetcher.
  pub fn fetch(&mut self) -> bool {
    if self.state.is_loading() {
      return false;
    }
    self.start_fetch()
  }

  /// Force a refetch, even if already loading or data exists.
  ///
  /// A response still in flight from an earlier fetch is discarded.
  pub fn refetch(&mut self) -> bool {
    // Cancel any pending fetch by dropping the receiver
    self.receiver = None;
    self.start_fetch()
  }

  /// Poll for results from a pending fetch.
  ///
  /// Returns `true` if the state changed (data arrived or error occurred).
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    // Try to receive without blocking
    match receiver.try_recv() {
      Ok(Ok(data)) => {
        self.data = Some(data);
        self.state = QueryState::Success;
        self.fetched_at = Some(Instant::now());
        self.invalidated = false;
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending - treat as error
        self.state = QueryState::Error("Query was cancelled".to_string());
        self.receiver = None;
        true
      }
    }
  }

  /// Internal: start the fetch operation
  fn start_fetch(&mut self) -> bool {
    let future = match &self.fetcher {
      Some(fetcher) => fetcher(),
      None => return false,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    tokio::spawn(async move {
      let result = future.await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
    true
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("data", &self.data)
      .field("fetched_at", &self.fetched_at)
      .field("stale_time", &self.stale_time)
      .field("invalidated", &self.invalidated)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_query_success() {
    let mut query = Query::new(|| async { Ok::<_, String>(vec![1, 2, 3]) });

    assert!(matches!(query.state(), QueryState::Idle));

    query.fetch();
    assert!(query.state().is_loading());

    // Wait for the result
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert_eq!(query.state(), &QueryState::Success);
    assert_eq!(query.data(), Some(&vec![1, 2, 3]));
  }

  #[tokio::test]
  async fn test_query_error_keeps_previous_data() {
    let fail = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let fail_clone = fail.clone();
    let mut query = Query::new(move || {
      let fail = fail_clone.clone();
      async move {
        if fail.load(std::sync::atomic::Ordering::SeqCst) {
          Err("Something went wrong".to_string())
        } else {
          Ok(7)
        }
      }
    });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();

    fail.store(true, std::sync::atomic::Ordering::SeqCst);
    query.refetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert_eq!(query.error(), Some("Something went wrong"));
    assert_eq!(query.data(), Some(&7));
  }

  #[tokio::test]
  async fn test_query_stale() {
    let mut query = Query::new(|| async { Ok::<_, String>(42) }).with_stale_time(Duration::ZERO);

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();

    // With zero stale time, should immediately be stale
    assert!(query.is_stale());
  }

  #[tokio::test]
  async fn test_invalidate_marks_stale_until_next_success() {
    let mut query = Query::new(|| async { Ok::<_, String>(1) });
    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();
    assert!(!query.is_stale());

    query.invalidate();
    assert!(query.is_stale());

    query.refetch();
    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();
    assert!(!query.is_stale());
  }

  #[tokio::test]
  async fn test_fetch_while_loading_is_noop() {
    let mut query = Query::new(|| async {
      tokio::time::sleep(Duration::from_millis(100)).await;
      Ok::<_, String>(42)
    });

    assert!(query.fetch());
    assert!(query.state().is_loading());

    // Second fetch should be no-op
    assert!(!query.fetch());
    assert!(query.state().is_loading());
  }

  #[tokio::test]
  async fn test_refetch_cancels_pending() {
    let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let counter_clone = counter.clone();

    let mut query = Query::new(move || {
      let counter = counter_clone.clone();
      async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok::<_, String>(counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
      }
    });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Refetch should cancel the first and start a new one
    query.refetch();
    tokio::time::sleep(Duration::from_millis(100)).await;

    query.poll();
    // Only the second fetch should have completed and been received
    assert_eq!(query.data(), Some(&1));
  }

  #[tokio::test]
  async fn test_set_data_without_fetcher() {
    let mut query: Query<Vec<i32>> = Query::empty();
    assert!(!query.fetch());

    query.set_data(|old| {
      assert!(old.is_none());
      vec![1]
    });
    query.set_data(|old| {
      let mut next = vec![0];
      next.extend(old.into_iter().flatten().copied());
      next
    });

    assert_eq!(query.state(), &QueryState::Success);
    assert_eq!(query.data(), Some(&vec![0, 1]));
  }
}
