mod input;
mod search_input;

pub use input::{InputResult, TextInput};
pub use search_input::{SearchEvent, SearchInput};

/// Generic result type for component key handling.
///
/// Standardizes how components report key handling to their parent views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResult<T> {
  /// Key was consumed, no event for parent to handle
  Handled,
  /// Key was consumed, here's an event for parent to process
  Event(T),
  /// Key was not consumed, parent should try next handler
  NotHandled,
}
