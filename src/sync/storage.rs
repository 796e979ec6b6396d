//! Storage-event channel: a well-known key written by whichever session
//! mutates documents, observed by every other session.
//!
//! Events are never delivered back to the session that published them.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 64;

/// A write to a storage key by some session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
  pub key: String,
  pub value: Option<String>,
  origin: String,
}

/// Receiving side of a storage channel, filtered to other sessions' writes.
pub struct StorageSubscription {
  rx: broadcast::Receiver<StorageEvent>,
  origin: String,
}

impl StorageSubscription {
  /// Next event from another session; `None` once the channel is closed.
  pub async fn recv(&mut self) -> Option<StorageEvent> {
    loop {
      match self.rx.recv().await {
        Ok(event) if event.origin == self.origin => continue,
        Ok(event) => return Some(event),
        Err(RecvError::Lagged(skipped)) => {
          // Only key presence matters, so the next event is as good as the skipped ones
          debug!(skipped, "storage events lagged");
        }
        Err(RecvError::Closed) => return None,
      }
    }
  }
}

pub trait StorageChannel: Send + Sync {
  /// Record a write to `key` for other sessions to see.
  fn publish(&self, key: &str) -> Result<()>;

  fn subscribe(&self) -> StorageSubscription;
}

fn new_origin() -> String {
  uuid::Uuid::new_v4().to_string()
}

/// Sessions living in one process, used to stand in for other tabs in tests.
#[cfg(test)]
#[derive(Clone)]
pub struct MemoryStorageChannel {
  tx: broadcast::Sender<StorageEvent>,
  origin: String,
}

#[cfg(test)]
impl Default for MemoryStorageChannel {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
impl MemoryStorageChannel {
  pub fn new() -> Self {
    let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
    Self {
      tx,
      origin: new_origin(),
    }
  }

  /// Another session on the same channel.
  pub fn tab(&self) -> Self {
    Self {
      tx: self.tx.clone(),
      origin: new_origin(),
    }
  }
}

#[cfg(test)]
impl StorageChannel for MemoryStorageChannel {
  fn publish(&self, key: &str) -> Result<()> {
    let event = StorageEvent {
      key: key.to_string(),
      value: Some(Utc::now().to_rfc3339()),
      origin: self.origin.clone(),
    };
    // No subscribers is not an error
    let _ = self.tx.send(event);
    Ok(())
  }

  fn subscribe(&self) -> StorageSubscription {
    StorageSubscription {
      rx: self.tx.subscribe(),
      origin: self.origin.clone(),
    }
  }
}

/// Schema for the shared key/value table.
const STORAGE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS storage_events (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    origin TEXT NOT NULL,
    version INTEGER NOT NULL
);
"#;

struct StorageRow {
  key: String,
  value: String,
  origin: String,
  version: i64,
}

/// Sessions in separate processes sharing one SQLite file.
///
/// Every publish bumps the key's version; a watcher task started on the first
/// subscription polls for version changes.
pub struct SqliteStorageChannel {
  conn: Arc<Mutex<Connection>>,
  origin: String,
  tx: broadcast::Sender<StorageEvent>,
  poll_every: Duration,
  watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SqliteStorageChannel {
  pub fn open(path: &Path, poll_every: Duration) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open storage database at {}: {}", path.display(), e))?;
    conn
      .execute_batch(STORAGE_SCHEMA)
      .map_err(|e| eyre!("Failed to run storage migrations: {}", e))?;

    let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
      origin: new_origin(),
      tx,
      poll_every,
      watcher: Mutex::new(None),
    })
  }

  fn read_rows(conn: &Mutex<Connection>) -> Result<Vec<StorageRow>> {
    let conn = conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut stmt = conn
      .prepare("SELECT key, value, origin, version FROM storage_events")
      .map_err(|e| eyre!("Failed to prepare storage query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok(StorageRow {
          key: row.get(0)?,
          value: row.get(1)?,
          origin: row.get(2)?,
          version: row.get(3)?,
        })
      })
      .map_err(|e| eyre!("Failed to query storage events: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(rows)
  }

  fn start_watcher(&self) -> JoinHandle<()> {
    let conn = Arc::clone(&self.conn);
    let tx = self.tx.clone();
    let poll_every = self.poll_every;

    // Writes that happened before we started watching are not events
    let mut seen: HashMap<String, i64> = match Self::read_rows(&conn) {
      Ok(rows) => rows.into_iter().map(|r| (r.key, r.version)).collect(),
      Err(e) => {
        warn!(error = %e, "failed to read storage snapshot");
        HashMap::new()
      }
    };

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(poll_every);
      loop {
        ticker.tick().await;
        let rows = match Self::read_rows(&conn) {
          Ok(rows) => rows,
          Err(e) => {
            warn!(error = %e, "failed to poll storage events");
            continue;
          }
        };

        for row in rows {
          if seen.get(&row.key) == Some(&row.version) {
            continue;
          }
          seen.insert(row.key.clone(), row.version);
          let event = StorageEvent {
            key: row.key,
            value: Some(row.value),
            origin: row.origin,
          };
          if tx.send(event).is_err() {
            debug!("no storage subscribers left");
          }
        }
      }
    })
  }
}

impl StorageChannel for SqliteStorageChannel {
  fn publish(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT INTO storage_events (key, value, origin, version) VALUES (?1, ?2, ?3, 1)
         ON CONFLICT(key) DO UPDATE SET
           value = excluded.value,
           origin = excluded.origin,
           version = storage_events.version + 1",
        params![key, Utc::now().to_rfc3339(), self.origin],
      )
      .map_err(|e| eyre!("Failed to publish storage event {}: {}", key, e))?;

    debug!(key, "storage event published");
    Ok(())
  }

  fn subscribe(&self) -> StorageSubscription {
    let rx = self.tx.subscribe();
    let mut watcher = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
    if watcher.is_none() {
      *watcher = Some(self.start_watcher());
    }

    StorageSubscription {
      rx,
      origin: self.origin.clone(),
    }
  }
}

impl Drop for SqliteStorageChannel {
  fn drop(&mut self) {
    let watcher = self.watcher.get_mut().unwrap_or_else(|e| e.into_inner());
    if let Some(task) = watcher.take() {
      task.abort();
    }
  }
}
