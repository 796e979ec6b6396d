//! Transient user notifications ("toasts").

use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
  Info,
  Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub level: NotificationLevel,
  pub message: String,
}

/// Sending half; cheap to clone into any component that reports to the user.
#[derive(Debug, Clone)]
pub struct Notifier {
  tx: mpsc::UnboundedSender<Notification>,
}

pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

pub fn channel() -> (Notifier, NotificationReceiver) {
  let (tx, rx) = mpsc::unbounded_channel();
  (Notifier { tx }, rx)
}

impl Notifier {
  pub fn info(&self, message: impl Into<String>) {
    let message = message.into();
    info!(%message, "notify");
    self.send(NotificationLevel::Info, message);
  }

  pub fn error(&self, message: impl Into<String>) {
    let message = message.into();
    warn!(%message, "notify");
    self.send(NotificationLevel::Error, message);
  }

  fn send(&self, level: NotificationLevel, message: String) {
    // Nobody listening is fine; notifications are best effort
    let _ = self.tx.send(Notification { level, message });
  }
}
