pub mod components;
pub mod renderfns;
pub mod view;
pub mod views;

use ratatui::widgets::ListState;
use sharecycle::donations::DonationHooks;
use sharecycle::session::AuthState;
use tokio::sync::watch;

/// What every view needs to build queries, mutations and child views.
#[derive(Clone)]
pub struct ViewContext {
  pub hooks: DonationHooks,
  pub auth: watch::Receiver<AuthState>,
}

impl ViewContext {
  pub fn auth_state(&self) -> AuthState {
    self.auth.borrow().clone()
  }
}

/// Keep the list selection inside `0..len`, selecting the first row when
/// nothing is selected.
pub fn ensure_valid_selection(state: &mut ListState, len: usize) {
  if len == 0 {
    state.select(None);
    return;
  }
  match state.selected() {
    Some(idx) if idx >= len => state.select(Some(len - 1)),
    None => state.select(Some(0)),
    _ => {}
  }
}
