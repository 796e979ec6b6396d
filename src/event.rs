use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::sync::WindowEvent;

/// Application events
#[derive(Debug)]
pub enum Event {
  /// Terminal key press
  Key(KeyEvent),
  /// Terminal window gained or lost focus
  Focus(WindowEvent),
  /// Periodic tick for query polling
  Tick,
}

/// Event handler that produces events from terminal input and a tick timer.
///
/// Focus changes are also broadcast so sync listeners can subscribe to them
/// without going through the main loop.
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
  focus: broadcast::Sender<WindowEvent>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let (focus, _) = broadcast::channel(16);
    let focus_tx = focus.clone();

    // Spawn terminal event reader
    tokio::spawn(async move {
      loop {
        if event::poll(tick_rate).unwrap_or(false) {
          let evt = match event::read() {
            Ok(evt) => evt,
            Err(_) => continue,
          };
          let event = match evt {
            CrosstermEvent::Key(key) if key.kind == KeyEventKind::Press => Event::Key(key),
            CrosstermEvent::FocusGained => Event::Focus(WindowEvent::FocusGained),
            CrosstermEvent::FocusLost => Event::Focus(WindowEvent::FocusLost),
            _ => continue,
          };
          if let Event::Focus(window_event) = &event {
            // No listeners mounted yet is fine
            let _ = focus_tx.send(*window_event);
          }
          if tx.send(event).is_err() {
            break;
          }
        } else if tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    Self { rx, focus }
  }

  /// Subscribe to window focus changes
  pub fn focus_events(&self) -> broadcast::Receiver<WindowEvent> {
    self.focus.subscribe()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
