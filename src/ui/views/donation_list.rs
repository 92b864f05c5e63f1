use crate::ui::components::{KeyResult, SearchEvent, SearchInput};
use crate::ui::ensure_valid_selection;
use crate::ui::renderfns::{age, category_color, status_color, truncate};
use crate::ui::view::{Shortcut, View, ViewAction};
use crate::ui::views::{DonationDetailView, MyDonationsView};
use crate::ui::ViewContext;
use chrono::Utc;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use sharecycle::model::{Category, Donation, DonationFilters, DonationStatus};
use sharecycle::query::QueryObserver;

/// Browse view: every listing matching the current filters
pub struct DonationListView {
  ctx: ViewContext,
  filters: DonationFilters,
  query: QueryObserver<Vec<Donation>>,
  list_state: ListState,
  search: SearchInput,
}

impl DonationListView {
  pub fn new(ctx: ViewContext, filters: DonationFilters) -> Self {
    let mut query = ctx.hooks.list(filters.clone());
    query.mount();
    Self {
      ctx,
      filters,
      query,
      list_state: ListState::default(),
      search: SearchInput::new(),
    }
  }

  fn donations(&self) -> &[Donation] {
    self.query.data().map(|v| v.as_slice()).unwrap_or(&[])
  }

  /// Swap in a query for the new filters. The old observer is dropped.
  fn set_filters(&mut self, filters: DonationFilters) {
    if filters == self.filters {
      return;
    }
    self.filters = filters;
    self.query = self.ctx.hooks.list(self.filters.clone());
    self.query.mount();
    self.list_state.select(Some(0));
  }

  fn filter_summary(&self) -> String {
    let params = self.filters.params();
    if params.is_empty() {
      return "all".to_string();
    }
    params
      .iter()
      .map(|(k, v)| format!("{}={}", k, v))
      .collect::<Vec<_>>()
      .join(" ")
  }

  fn render_list(&mut self, frame: &mut Frame, area: Rect) {
    let len = self.donations().len();
    ensure_valid_selection(&mut self.list_state, len);

    let title = if self.query.is_loading() {
      format!(" Donations [{}] (loading...) ", self.filter_summary())
    } else if let Some(e) = self.query.error() {
      format!(" Donations [{}] (error: {}) ", self.filter_summary(), e)
    } else if self.query.is_fetching() {
      format!(" Donations [{}] ({}, refreshing...) ", self.filter_summary(), len)
    } else {
      format!(" Donations [{}] ({}) ", self.filter_summary(), len)
    };

    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    if len == 0 && !self.query.is_loading() {
      let content = if self.query.error().is_some() {
        "Failed to load donations. Press 'r' to retry."
      } else if self.filters.is_empty() {
        "Nothing listed yet."
      } else {
        "No donations match these filters."
      };
      let paragraph = Paragraph::new(content)
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      return;
    }

    let now = Utc::now();
    let items: Vec<ListItem> = self
      .donations()
      .iter()
      .map(|donation| {
        ListItem::new(Line::from(vec![
          Span::styled(
            format!("{:<10}", donation.status),
            Style::default().fg(status_color(donation.status)),
          ),
          Span::raw(" "),
          Span::styled(
            format!("{:<12}", donation.category),
            Style::default().fg(category_color(donation.category)),
          ),
          Span::raw(" "),
          Span::raw(format!("{:<40}", truncate(&donation.title, 40))),
          Span::raw(" "),
          Span::styled(
            format!("{:<20}", truncate(&donation.location, 20)),
            Style::default().fg(Color::DarkGray),
          ),
          Span::styled(format!("{:>4}", age(donation.created_at, now)), Style::default().fg(Color::DarkGray)),
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

/// Step through `None`, then every variant, then back to `None`.
fn cycle<T: Copy + PartialEq>(current: Option<T>, all: &[T]) -> Option<T> {
  match current {
    None => all.first().copied(),
    Some(value) => {
      let idx = all.iter().position(|v| *v == value)?;
      all.get(idx + 1).copied()
    }
  }
}

impl View for DonationListView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    let current = self.filters.search.clone().unwrap_or_default();
    match self.search.handle_key(key, &current) {
      KeyResult::Handled => return ViewAction::None,
      KeyResult::Event(SearchEvent::Submitted(text)) => {
        let search = (!text.is_empty()).then_some(text);
        self.set_filters(DonationFilters {
          search,
          ..self.filters.clone()
        });
        return ViewAction::None;
      }
      KeyResult::Event(SearchEvent::Cleared) => {
        self.set_filters(DonationFilters {
          search: None,
          ..self.filters.clone()
        });
        return ViewAction::None;
      }
      KeyResult::NotHandled => {}
    }

    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.list_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.list_state.select_previous(),
      KeyCode::Char('c') => {
        let category = cycle(self.filters.category, Category::ALL);
        self.set_filters(DonationFilters {
          category,
          ..self.filters.clone()
        });
      }
      KeyCode::Char('s') => {
        let status = cycle(self.filters.status, DonationStatus::ALL);
        self.set_filters(DonationFilters {
          status,
          ..self.filters.clone()
        });
      }
      KeyCode::Char('x') => self.set_filters(DonationFilters::default()),
      KeyCode::Char('r') => self.query.refetch(),
      KeyCode::Char('m') => {
        return ViewAction::Push(Box::new(MyDonationsView::new(self.ctx.clone())));
      }
      KeyCode::Enter => {
        let selected = self
          .list_state
          .selected()
          .and_then(|idx| self.donations().get(idx))
          .map(|d| d.id.clone());
        if let Some(id) = selected {
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
    self.search.render_overlay(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    "Donations".to_string()
  }

  fn tick(&mut self) {
    self.query.poll();
  }

  fn shortcuts(&self) -> Vec<Shortcut> {
    vec![
      Shortcut::new("/", "search").with_priority(10),
      Shortcut::new("c", "category").with_priority(20),
      Shortcut::new("s", "status").with_priority(30),
      Shortcut::new("x", "clear").with_priority(40),
      Shortcut::new("m", "mine").with_priority(50),
      Shortcut::new("r", "refresh").with_priority(60),
      Shortcut::new("q", "quit").with_priority(90),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cycle_wraps_through_none() {
    let all = DonationStatus::ALL;
    assert_eq!(cycle(None, all), Some(DonationStatus::Available));
    assert_eq!(cycle(Some(DonationStatus::Available), all), Some(DonationStatus::Reserved));
    assert_eq!(cycle(Some(DonationStatus::Reserved), all), Some(DonationStatus::Donated));
    assert_eq!(cycle(Some(DonationStatus::Donated), all), None);
  }

  #[test]
  fn test_cycle_empty() {
    let none: &[Category] = &[];
    assert_eq!(cycle(None, none), None);
  }
}
