use super::input::{InputResult, TextInput};
use super::KeyResult;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

/// Events emitted by the search input that the parent view applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent {
  /// Enter pressed with this text (may be empty)
  Submitted(String),
  /// Escape pressed, the search should be dropped
  Cleared,
}

/// Search prompt opened with `/`
#[derive(Debug, Clone, Default)]
pub struct SearchInput {
  input: TextInput,
  active: bool,
}

impl SearchInput {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_active(&self) -> bool {
    self.active
  }

  /// Open the prompt with `current` pre-filled
  pub fn activate(&mut self, current: &str) {
    self.active = true;
    self.input = TextInput::with_value(current);
  }

  /// Handle a key event. Call this regardless of active state; it handles
  /// activation too.
  pub fn handle_key(&mut self, key: KeyEvent, current: &str) -> KeyResult<SearchEvent> {
    if !self.active {
      if key.code == KeyCode::Char('/') {
        self.activate(current);
        return KeyResult::Handled;
      }
      return KeyResult::NotHandled;
    }

    match self.input.handle_key(key) {
      InputResult::Submitted(text) => {
        self.active = false;
        KeyResult::Event(SearchEvent::Submitted(text.trim().to_string()))
      }
      InputResult::Cancelled => {
        self.active = false;
        self.input.clear();
        KeyResult::Event(SearchEvent::Cleared)
      }
      // While open, the prompt swallows every key
      InputResult::Consumed | InputResult::NotHandled => KeyResult::Handled,
    }
  }

  /// Render the search overlay if active
  pub fn render_overlay(&self, frame: &mut Frame, area: Rect) {
    if !self.active {
      return;
    }

    let width = (area.width * 60 / 100).clamp(30, 60).min(area.width);
    let overlay_area = Rect::new(area.x + 1, area.y + 1, width.saturating_sub(1), 3.min(area.height));

    frame.render_widget(Clear, overlay_area);

    let block = Block::default()
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Yellow))
      .title(" Search title or description ");

    let inner = block.inner(overlay_area);
    frame.render_widget(block, overlay_area);

    if inner.height == 0 {
      return;
    }

    let (before, after) = self.input.split_at_cursor();
    let input_line = Line::from(vec![
      Span::styled("/", Style::default().fg(Color::Yellow)),
      Span::raw(before),
      Span::styled("_", Style::default().fg(Color::Yellow)), // Cursor
      Span::raw(after),
    ]);
    frame.render_widget(Paragraph::new(input_line), inner);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossterm::event::KeyModifiers;

  fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
  }

  #[test]
  fn test_inactive_ignores_keys() {
    let mut search = SearchInput::new();
    assert_eq!(search.handle_key(key(KeyCode::Char('j')), ""), KeyResult::NotHandled);
    assert!(!search.is_active());
  }

  #[test]
  fn test_submit_trims_and_closes() {
    let mut search = SearchInput::new();
    assert_eq!(search.handle_key(key(KeyCode::Char('/')), ""), KeyResult::Handled);
    for c in " lamp ".chars() {
      assert_eq!(search.handle_key(key(KeyCode::Char(c)), ""), KeyResult::Handled);
    }
    assert_eq!(
      search.handle_key(key(KeyCode::Enter), ""),
      KeyResult::Event(SearchEvent::Submitted("lamp".to_string()))
    );
    assert!(!search.is_active());
  }

  #[test]
  fn test_reopen_prefills_and_escape_clears() {
    let mut search = SearchInput::new();
    search.handle_key(key(KeyCode::Char('/')), "books");
    search.handle_key(key(KeyCode::Char('!')), "books");
    assert_eq!(
      search.handle_key(key(KeyCode::Enter), "books"),
      KeyResult::Event(SearchEvent::Submitted("books!".to_string()))
    );

    search.handle_key(key(KeyCode::Char('/')), "books!");
    assert_eq!(
      search.handle_key(key(KeyCode::Esc), "books!"),
      KeyResult::Event(SearchEvent::Cleared)
    );
  }
}
