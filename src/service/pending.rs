use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Kind of write awaiting reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
  Create,
  Edit,
  Favorite,
  Archive,
  Restore,
  Delete,
}

impl PendingKind {
  pub fn label(self) -> &'static str {
    match self {
      Self::Create => "Upload",
      Self::Edit => "Edit",
      Self::Favorite => "Favorite",
      Self::Archive => "Archive",
      Self::Restore => "Restore",
      Self::Delete => "Delete",
    }
  }
}

#[derive(Debug, Clone)]
pub struct PendingWrite {
  pub id: String,
  pub kind: PendingKind,
  pub name: String,
  pub started_at: DateTime<Utc>,
}

impl PendingWrite {
  /// e.g. "Upload X-ray still waiting (3s)"
  pub fn describe(&self, now: DateTime<Utc>) -> String {
    let waited = (now - self.started_at).num_seconds().max(0);
    format!("{} {} still waiting ({}s)", self.kind.label(), self.name, waited)
  }
}

/// Handle for one registered write. Two writes on the same record get
/// different tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingToken(u64);

/// Optimistic writes that the backend has not answered yet.
///
/// Every entry is removed by `resolve` once its write commits or rolls back.
#[derive(Default)]
pub struct PendingWrites {
  next: AtomicU64,
  writes: Mutex<HashMap<PendingToken, PendingWrite>>,
}

impl PendingWrites {
  fn writes(&self) -> MutexGuard<'_, HashMap<PendingToken, PendingWrite>> {
    self.writes.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn begin(&self, id: &str, kind: PendingKind, name: &str) -> PendingToken {
    let token = PendingToken(self.next.fetch_add(1, Ordering::Relaxed));
    self.writes().insert(
      token,
      PendingWrite {
        id: id.to_string(),
        kind,
        name: name.to_string(),
        started_at: Utc::now(),
      },
    );
    token
  }

  pub fn resolve(&self, token: PendingToken) -> Option<PendingWrite> {
    self.writes().remove(&token)
  }

  #[cfg(test)]
  pub fn is_empty(&self) -> bool {
    self.writes().is_empty()
  }

  /// Pending writes, oldest first.
  pub fn snapshot(&self) -> Vec<PendingWrite> {
    let mut writes: Vec<_> = self.writes().values().cloned().collect();
    writes.sort_by_key(|w| w.started_at);
    writes
  }
}
