use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use super::storage::StorageSubscription;
use super::{MountHandle, RefreshReason, RefreshScope, Refresher};

/// Terminal window focus changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
  FocusGained,
  FocusLost,
}

/// Refreshes when the window regains focus or another session writes the
/// sentinel storage key.
pub struct SyncListener {
  refresher: Arc<dyn Refresher>,
  sentinel_key: String,
  scope: RefreshScope,
}

impl SyncListener {
  pub fn new(refresher: Arc<dyn Refresher>, sentinel_key: impl Into<String>) -> Self {
    Self {
      refresher,
      sentinel_key: sentinel_key.into(),
      scope: RefreshScope::default(),
    }
  }

  pub fn with_scope(mut self, scope: RefreshScope) -> Self {
    self.scope = scope;
    self
  }

  /// Start listening. Both subscriptions are released when the handle goes.
  pub fn mount(
    self,
    mut focus: broadcast::Receiver<WindowEvent>,
    mut storage: StorageSubscription,
  ) -> MountHandle {
    let task = tokio::spawn(async move {
      let mut focus_open = true;
      let mut storage_open = true;

      loop {
        tokio::select! {
          event = focus.recv(), if focus_open => match event {
            Ok(WindowEvent::FocusGained) => {
              self.refresher.refresh(self.scope.request(RefreshReason::Focus));
            }
            Ok(WindowEvent::FocusLost) => {}
            Err(RecvError::Lagged(skipped)) => {
              debug!(skipped, "focus events lagged");
            }
            Err(RecvError::Closed) => focus_open = false,
          },
          event = storage.recv(), if storage_open => match event {
            Some(event) if event.key == self.sentinel_key => {
              debug!(key = %event.key, written_at = ?event.value, "documents changed in another session");
              self.refresher.refresh(self.scope.request(RefreshReason::Storage));
            }
            Some(event) => debug!(key = %event.key, "ignoring storage event"),
            None => storage_open = false,
          },
          else => break,
        }
      }
      debug!("sync listener stopped");
    });

    MountHandle::new(task)
  }
}
