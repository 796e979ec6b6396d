use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

use super::{MountHandle, RefreshReason, RefreshScope, Refresher};

/// Produces background refresh triggers for a mounted view.
#[async_trait]
pub trait RefreshSource: Send + 'static {
  /// Wait for the next trigger. `None` ends the background loop.
  async fn next(&mut self) -> Option<RefreshReason>;
}

/// Fixed-interval polling. The first trigger fires one period after creation.
pub struct PollingSource {
  interval: Interval,
}

impl PollingSource {
  pub fn every(period: Duration) -> Self {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Self { interval }
  }
}

#[async_trait]
impl RefreshSource for PollingSource {
  async fn next(&mut self) -> Option<RefreshReason> {
    self.interval.tick().await;
    Some(RefreshReason::Poll)
  }
}

/// Forces a refresh when a view mounts, then keeps refreshing from a
/// [`RefreshSource`] until the view unmounts.
pub struct Initializer {
  refresher: Arc<dyn Refresher>,
  scope: RefreshScope,
}

impl Initializer {
  pub fn new(refresher: Arc<dyn Refresher>) -> Self {
    Self {
      refresher,
      scope: RefreshScope::default(),
    }
  }

  pub fn with_scope(mut self, scope: RefreshScope) -> Self {
    self.scope = scope;
    self
  }

  /// Refresh now and start the background loop.
  ///
  /// The returned handle must be kept for as long as the view is mounted.
  pub fn mount<S: RefreshSource>(self, mut source: S) -> MountHandle {
    self
      .refresher
      .refresh(self.scope.request(RefreshReason::Mount));

    let task = tokio::spawn(async move {
      while let Some(reason) = source.next().await {
        self.refresher.refresh(self.scope.request(reason));
      }
      debug!("refresh source exhausted");
    });

    MountHandle::new(task)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sync::testing::RecordingRefresher;

  #[tokio::test(start_paused = true)]
  async fn test_polls_every_five_seconds_until_unmount() {
    let refresher = Arc::new(RecordingRefresher::default());
    let handle = Initializer::new(refresher.clone()).mount(PollingSource::every(Duration::from_secs(5)));

    // Mount refresh happens synchronously
    assert_eq!(refresher.count(RefreshReason::Mount), 1);
    assert_eq!(refresher.count(RefreshReason::Poll), 0);

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(refresher.count(RefreshReason::Poll), 2);

    handle.unmount().await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(refresher.count(RefreshReason::Poll), 2);
    assert_eq!(refresher.total(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropping_handle_stops_polling() {
    let refresher = Arc::new(RecordingRefresher::default());
    let handle = Initializer::new(refresher.clone()).mount(PollingSource::every(Duration::from_secs(5)));

    tokio::time::sleep(Duration::from_secs(6)).await;
    drop(handle);
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(refresher.count(RefreshReason::Poll), 1);
  }

  struct Scripted(Vec<RefreshReason>);

  #[async_trait]
  impl RefreshSource for Scripted {
    async fn next(&mut self) -> Option<RefreshReason> {
      if self.0.is_empty() {
        None
      } else {
        Some(self.0.remove(0))
      }
    }
  }

  #[tokio::test]
  async fn test_custom_source_replaces_polling() {
    let refresher = Arc::new(RecordingRefresher::default());
    let handle = Initializer::new(refresher.clone())
      .with_scope(RefreshScope::pet("p1"))
      .mount(Scripted(vec![RefreshReason::Storage, RefreshReason::Storage]));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(handle.is_finished());
    assert_eq!(refresher.count(RefreshReason::Storage), 2);
    assert!(refresher
      .requests()
      .iter()
      .all(|r| r.scope.pet_id.as_deref() == Some("p1")));
  }
}
