use crate::ui::ensure_valid_selection;
use crate::ui::renderfns::{status_color, truncate};
use crate::ui::view::{Shortcut, StatusMessage, View, ViewAction};
use crate::ui::views::DonationDetailView;
use crate::ui::ViewContext;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use sharecycle::donations::DonationUpdate;
use sharecycle::model::{Donation, DonationId, DonationPatch, Identity};
use sharecycle::mutation::{Mutation, MutationState};
use sharecycle::query::QueryObserver;

/// Listings owned by one user, with status changes and deletion
pub struct MyDonationsView {
  ctx: ViewContext,
  owner: Option<Identity>,
  query: Option<QueryObserver<Vec<Donation>>>,
  list_state: ListState,
  update: Mutation<DonationUpdate, Donation>,
  delete: Mutation<DonationId, ()>,
  /// Listing waiting for a second `d` press
  confirm_delete: Option<DonationId>,
  message: Option<StatusMessage>,
}

impl MyDonationsView {
  pub fn new(ctx: ViewContext) -> Self {
    let update = ctx.hooks.update();
    let delete = ctx.hooks.delete();
    let mut view = Self {
      ctx,
      owner: None,
      query: None,
      list_state: ListState::default(),
      update,
      delete,
      confirm_delete: None,
      message: None,
    };
    view.sync_owner();
    view
  }

  /// Follow the session: (re)build the query when the signed-in user changes.
  fn sync_owner(&mut self) {
    let owner = self.ctx.auth_state().user;
    if owner.as_ref().map(|o| &o.id) == self.owner.as_ref().map(|o| &o.id) {
      return;
    }
    self.query = owner.as_ref().map(|owner| {
      let mut query = self.ctx.hooks.owned_by(owner.id.clone());
      query.mount();
      query
    });
    self.owner = owner;
    self.list_state.select(Some(0));
  }

  fn donations(&self) -> &[Donation] {
    self
      .query
      .as_ref()
      .and_then(|q| q.data())
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  fn selected(&self) -> Option<&Donation> {
    self.list_state.selected().and_then(|idx| self.donations().get(idx))
  }

  fn busy(&self) -> bool {
    self.update.is_pending() || self.delete.is_pending()
  }

  fn cycle_status(&mut self) {
    if self.busy() {
      return;
    }
    let Some(donation) = self.selected() else {
      return;
    };
    let next = donation.status.next();
    let input = DonationUpdate {
      id: donation.id.clone(),
      patch: DonationPatch::status(next),
    };
    self.message = Some(StatusMessage::Info(format!("Marking {} as {}...", input.id, next)));
    self.update.start(input);
  }

  fn request_delete(&mut self) {
    if self.busy() {
      return;
    }
    let Some(id) = self.selected().map(|d| d.id.clone()) else {
      return;
    };
    if self.confirm_delete.as_ref() == Some(&id) {
      self.confirm_delete = None;
      self.message = Some(StatusMessage::Info(format!("Deleting {}...", id)));
      self.delete.start(id);
    } else {
      self.message = Some(StatusMessage::Info(format!("Press 'd' again to delete {}", id)));
      self.confirm_delete = Some(id);
    }
  }

  fn render_list(&mut self, frame: &mut Frame, area: Rect) {
    let len = self.donations().len();
    ensure_valid_selection(&mut self.list_state, len);

    let who = self.owner.as_ref().map(Identity::label).unwrap_or_default();
    let title = match &self.query {
      Some(q) if q.is_loading() => format!(" My donations [{}] (loading...) ", who),
      Some(q) if q.error().is_some() => format!(" My donations [{}] (error) ", who),
      Some(_) => format!(" My donations [{}] ({}) ", who, len),
      None => " My donations ".to_string(),
    };

    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    let empty_text = match &self.query {
      _ if self.ctx.auth_state().loading && self.owner.is_none() => Some("Checking session...".to_string()),
      None => Some("Not signed in. Run `sharecycle login` to manage your listings.".to_string()),
      Some(q) if q.is_loading() => None,
      Some(q) => match q.error() {
        Some(e) => Some(format!("Failed to load your listings: {}\n\nPress 'r' to retry.", e)),
        None if len == 0 => Some("You have not listed anything yet.".to_string()),
        None => None,
      },
    };
    if let Some(text) = empty_text {
      let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      return;
    }

    let items: Vec<ListItem> = self
      .donations()
      .iter()
      .map(|donation| {
        let marker = if self.confirm_delete.as_ref() == Some(&donation.id) {
          Span::styled("DELETE? ", Style::default().fg(Color::Red).bold())
        } else {
          Span::raw("")
        };
        ListItem::new(Line::from(vec![
          marker,
          Span::styled(
            format!("{:<10}", donation.status),
            Style::default().fg(status_color(donation.status)),
          ),
          Span::raw(" "),
          Span::raw(format!("{:<40}", truncate(&donation.title, 40))),
          Span::raw(" "),
          Span::styled(
            donation.updated_at.format("%Y-%m-%d").to_string(),
            Style::default().fg(Color::DarkGray),
          ),
        ]))
      })
      .collect();

    let list = List::new(items)
      .block(block)
      .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
      .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut self.list_state);
  }
}

impl View for MyDonationsView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    // Any other key cancels a pending delete
    if key.code != KeyCode::Char('d') && self.confirm_delete.take().is_some() {
      self.message = None;
    }

    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.list_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.list_state.select_previous(),
      KeyCode::Char('s') => self.cycle_status(),
      KeyCode::Char('d') => self.request_delete(),
      KeyCode::Char('r') => {
        if let Some(query) = &mut self.query {
          query.refetch();
        }
      }
      KeyCode::Enter => {
        if let Some(id) = self.selected().map(|d| d.id.clone()) {
          return ViewAction::Push(Box::new(DonationDetailView::new(&self.ctx, id)));
        }
      }
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    self.render_list(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    "My donations".to_string()
  }

  fn tick(&mut self) {
    self.sync_owner();
    if let Some(query) = &mut self.query {
      query.poll();
    }

    if self.update.poll() {
      self.message = match self.update.state() {
        MutationState::Success(donation) => Some(StatusMessage::Info(format!(
          "{} is now {}",
          truncate(&donation.title, 30),
          donation.status
        ))),
        MutationState::Error(e) => Some(StatusMessage::Error(format!("Update failed: {}", e))),
        _ => None,
      };
    }
    if self.delete.poll() {
      self.message = match self.delete.state() {
        MutationState::Success(_) => Some(StatusMessage::Info("Listing deleted".to_string())),
        MutationState::Error(e) => Some(StatusMessage::Error(format!("Delete failed: {}", e))),
        _ => None,
      };
    }
  }

  fn status_message(&self) -> Option<StatusMessage> {
    self.message.clone()
  }

  fn shortcuts(&self) -> Vec<Shortcut> {
    vec![
      Shortcut::new("s", "next status").with_priority(10),
      Shortcut::new("d", "delete").with_priority(20),
      Shortcut::new("r", "refresh").with_priority(30),
      Shortcut::new("q", "back").with_priority(90),
    ]
  }
}
