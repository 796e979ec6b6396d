//! Key bindings of the watch view

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
  Refresh,
  Help,
  Quit,
}

#[derive(Debug, Clone)]
pub struct KeyBinding {
  pub key: char,
  pub action: Action,
  pub description: &'static str,
}

/// All available bindings
pub const BINDINGS: &[KeyBinding] = &[
  KeyBinding {
    key: 'r',
    action: Action::Refresh,
    description: "refresh now",
  },
  KeyBinding {
    key: '?',
    action: Action::Help,
    description: "show keys",
  },
  KeyBinding {
    key: 'q',
    action: Action::Quit,
    description: "quit",
  },
];

/// Resolve a key press to an action
pub fn action_for(key: &KeyEvent) -> Option<Action> {
  if key.modifiers.contains(KeyModifiers::CONTROL) {
    return match key.code {
      KeyCode::Char('c') => Some(Action::Quit),
      _ => None,
    };
  }

  match key.code {
    KeyCode::Char(c) => {
      let c = c.to_ascii_lowercase();
      BINDINGS.iter().find(|b| b.key == c).map(|b| b.action)
    }
    KeyCode::Esc => Some(Action::Quit),
    _ => None,
  }
}

/// One-line summary, e.g. "r refresh now | ? show keys | q quit"
pub fn help_line() -> String {
  BINDINGS
    .iter()
    .map(|b| format!("{} {}", b.key, b.description))
    .collect::<Vec<_>>()
    .join(" | ")
}
