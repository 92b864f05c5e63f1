use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Result of handling a key event in an input component
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputResult {
  /// Key was handled, keep editing
  Consumed,
  /// Enter pressed, here's the submitted value
  Submitted(String),
  /// Escape pressed, input cancelled
  Cancelled,
  /// Key not handled, pass to next handler
  NotHandled,
}

/// Single-line text input. The cursor counts characters, not bytes.
#[derive(Debug, Clone, Default)]
pub struct TextInput {
  chars: Vec<char>,
  cursor: usize,
}

impl TextInput {
  pub fn new() -> Self {
    Self::default()
  }

  /// Input pre-filled with `value`, cursor at the end
  pub fn with_value(value: &str) -> Self {
    let chars: Vec<char> = value.chars().collect();
    let cursor = chars.len();
    Self { chars, cursor }
  }

  pub fn value(&self) -> String {
    self.chars.iter().collect()
  }

  pub fn is_empty(&self) -> bool {
    self.chars.is_empty()
  }

  pub fn clear(&mut self) {
    self.chars.clear();
    self.cursor = 0;
  }

  /// Text before and after the cursor, for rendering
  pub fn split_at_cursor(&self) -> (String, String) {
    (
      self.chars[..self.cursor].iter().collect(),
      self.chars[self.cursor..].iter().collect(),
    )
  }

  pub fn handle_key(&mut self, key: KeyEvent) -> InputResult {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
      KeyCode::Esc => InputResult::Cancelled,
      KeyCode::Enter => InputResult::Submitted(self.value()),
      KeyCode::Backspace => {
        if self.cursor > 0 {
          self.cursor -= 1;
          self.chars.remove(self.cursor);
        }
        InputResult::Consumed
      }
      KeyCode::Delete => {
        if self.cursor < self.chars.len() {
          self.chars.remove(self.cursor);
        }
        InputResult::Consumed
      }
      KeyCode::Left => {
        self.cursor = self.cursor.saturating_sub(1);
        InputResult::Consumed
      }
      KeyCode::Right => {
        self.cursor = (self.cursor + 1).min(self.chars.len());
        InputResult::Consumed
      }
      KeyCode::Home => {
        self.cursor = 0;
        InputResult::Consumed
      }
      KeyCode::End => {
        self.cursor = self.chars.len();
        InputResult::Consumed
      }
      KeyCode::Char('a') if ctrl => {
        self.cursor = 0;
        InputResult::Consumed
      }
      KeyCode::Char('e') if ctrl => {
        self.cursor = self.chars.len();
        InputResult::Consumed
      }
      KeyCode::Char('u') if ctrl => {
        // Clear line before cursor
        self.chars.drain(..self.cursor);
        self.cursor = 0;
        InputResult::Consumed
      }
      KeyCode::Char('w') if ctrl => {
        // Delete word before cursor
        let mut start = self.cursor;
        while start > 0 && self.chars[start - 1] == ' ' {
          start -= 1;
        }
        while start > 0 && self.chars[start - 1] != ' ' {
          start -= 1;
        }
        self.chars.drain(start..self.cursor);
        self.cursor = start;
        InputResult::Consumed
      }
      KeyCode::Char(_) if ctrl => InputResult::NotHandled,
      KeyCode::Char(c) => {
        self.chars.insert(self.cursor, c);
        self.cursor += 1;
        InputResult::Consumed
      }
      _ => InputResult::NotHandled,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
  }

  fn ctrl_key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::CONTROL)
  }

  fn typed(text: &str) -> TextInput {
    let mut input = TextInput::new();
    for c in text.chars() {
      input.handle_key(key(KeyCode::Char(c)));
    }
    input
  }

  #[test]
  fn test_typing_and_submit() {
    let mut input = typed("lamp");
    assert_eq!(
      input.handle_key(key(KeyCode::Enter)),
      InputResult::Submitted("lamp".to_string())
    );
  }

  #[test]
  fn test_multibyte_editing() {
    let mut input = typed("café");
    input.handle_key(key(KeyCode::Backspace));
    assert_eq!(input.value(), "caf");

    input.handle_key(key(KeyCode::Left));
    input.handle_key(key(KeyCode::Char('ñ')));
    assert_eq!(input.value(), "cañf");
    assert_eq!(input.split_at_cursor(), ("cañ".to_string(), "f".to_string()));
  }

  #[test]
  fn test_ctrl_w_deletes_word() {
    let mut input = typed("oak  bookshelf");
    input.handle_key(ctrl_key(KeyCode::Char('w')));
    assert_eq!(input.value(), "oak  ");
    input.handle_key(ctrl_key(KeyCode::Char('w')));
    assert_eq!(input.value(), "");
  }

  #[test]
  fn test_ctrl_u_clears_before_cursor() {
    let mut input = typed("winter coats");
    for _ in 0..5 {
      input.handle_key(key(KeyCode::Left));
    }
    input.handle_key(ctrl_key(KeyCode::Char('u')));
    assert_eq!(input.value(), "coats");
  }

  #[test]
  fn test_cancel_and_prefill() {
    let mut input = TextInput::with_value("books");
    assert_eq!(input.handle_key(key(KeyCode::Esc)), InputResult::Cancelled);
    assert_eq!(input.value(), "books");
    input.clear();
    assert!(input.is_empty());
  }
}
