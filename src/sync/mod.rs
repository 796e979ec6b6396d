//! Keeps cached document state in step with the backend.
//!
//! Writes go through [`CacheOperations`] optimistically; a [`Refresher`] then
//! invalidates and refetches. [`SyncListener`] and [`Initializer`] trigger
//! refreshes on focus, cross-session storage writes and a polling interval.

mod driver;
mod initializer;
mod listener;
mod operations;
pub mod storage;

pub use driver::RefreshDriver;
pub use initializer::{Initializer, PollingSource, RefreshSource};
pub use listener::{SyncListener, WindowEvent};
pub use operations::CacheOperations;
#[cfg(test)]
pub use storage::MemoryStorageChannel;
pub use storage::{SqliteStorageChannel, StorageChannel, StorageSubscription};

use tokio::task::JoinHandle;

/// What caused a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
  /// A view was mounted
  Mount,
  /// Polling interval elapsed
  Poll,
  /// The terminal regained focus
  Focus,
  /// Another session wrote the storage key
  Storage,
  /// A local write finished
  Mutation,
  /// The user asked for it
  Manual,
}

/// Which partitions a refresh covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshScope {
  /// Also refresh one pet's documents
  pub pet_id: Option<String>,
  /// Also refresh the archived view
  pub include_archived: bool,
}

impl RefreshScope {
  pub fn pet(pet_id: impl Into<String>) -> Self {
    Self {
      pet_id: Some(pet_id.into()),
      include_archived: false,
    }
  }

  pub fn archived() -> Self {
    Self {
      pet_id: None,
      include_archived: true,
    }
  }

  pub fn request(&self, reason: RefreshReason) -> RefreshRequest {
    RefreshRequest {
      reason,
      scope: self.clone(),
      announce: false,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
  pub reason: RefreshReason,
  pub scope: RefreshScope,
  /// Tell the user once the refresh has been issued
  pub announce: bool,
}

impl RefreshRequest {
  pub fn announced(mut self) -> Self {
    self.announce = true;
    self
  }
}

/// Anything that can bring cached documents back in line with the backend.
///
/// Refreshes are idempotent; overlapping calls only cost redundant fetches.
pub trait Refresher: Send + Sync {
  fn refresh(&self, request: RefreshRequest);
}

/// Background task owned by a mounted view.
///
/// Dropping the handle aborts the task; [`unmount`](Self::unmount) also
/// waits until it has stopped.
pub struct MountHandle {
  task: Option<JoinHandle<()>>,
}

impl MountHandle {
  fn new(task: JoinHandle<()>) -> Self {
    Self { task: Some(task) }
  }

  #[cfg(test)]
  pub fn is_finished(&self) -> bool {
    self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
  }

  pub async fn unmount(mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
      let _ = task.await;
    }
  }
}

impl Drop for MountHandle {
  fn drop(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }
}
