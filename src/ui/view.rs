use crossterm::event::KeyEvent;
use ratatui::prelude::*;

/// A keyboard shortcut hint for display in the header
#[derive(Debug, Clone)]
pub struct Shortcut {
  pub key: &'static str,
  pub label: &'static str,
  pub priority: u8, // Lower = shown first
}

impl Shortcut {
  pub const fn new(key: &'static str, label: &'static str) -> Self {
    Self {
      key,
      label,
      priority: 100,
    }
  }

  pub const fn with_priority(mut self, priority: u8) -> Self {
    self.priority = priority;
    self
  }
}

/// Actions that a view can request in response to user input
pub enum ViewAction {
  /// No action needed
  None,
  /// Push a new view onto the stack
  Push(Box<dyn View>),
  /// Pop current view from stack (go back)
  Pop,
}

/// Trait for view behavior
///
/// Views handle their own input modes (search, confirmation) and return
/// actions for the App to execute: App → View → Components.
///
/// Views that load data own `QueryObserver`s, mounted when the view is
/// created and polled in `tick()`. Popping a view drops it, which unmounts
/// its queries.
pub trait View {
  /// Handle a key event, returning an action for App to execute
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction;

  /// Render the view to the frame
  fn render(&mut self, frame: &mut Frame, area: Rect);

  /// Get the breadcrumb label for this view
  fn breadcrumb_label(&self) -> String;

  /// Called on each tick to allow views to poll queries and mutations
  fn tick(&mut self) {}

  /// Message for the footer, e.g. the result of the last write
  fn status_message(&self) -> Option<StatusMessage> {
    None
  }

  /// Get keyboard shortcuts to display in the header
  fn shortcuts(&self) -> Vec<Shortcut> {
    vec![Shortcut::new("q", "back").with_priority(90)]
  }
}

/// Footer message with severity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusMessage {
  Info(String),
  Error(String),
}

impl StatusMessage {
  pub fn text(&self) -> &str {
    match self {
      StatusMessage::Info(text) | StatusMessage::Error(text) => text,
    }
  }

  pub fn color(&self) -> Color {
    match self {
      StatusMessage::Info(_) => Color::Green,
      StatusMessage::Error(_) => Color::Red,
    }
  }
}
