use crate::ui::renderfns::{category_color, status_color, truncate};
use crate::ui::view::{Shortcut, View, ViewAction};
use crate::ui::ViewContext;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use sharecycle::model::{Donation, DonationId};
use sharecycle::query::QueryObserver;

/// A single listing with its full description
pub struct DonationDetailView {
  id: DonationId,
  query: QueryObserver<Donation>,
}

impl DonationDetailView {
  pub fn new(ctx: &ViewContext, id: DonationId) -> Self {
    let mut query = ctx.hooks.detail(id.clone());
    query.mount();
    Self { id, query }
  }

  fn render_content(&self, frame: &mut Frame, area: Rect) {
    let block = Block::default()
      .title(format!(" Listing {} ", self.id))
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let Some(donation) = self.query.data() else {
      let (text, color) = match self.query.error() {
        Some(e) => (format!("Error: {}\n\nPress 'r' to retry.", e), Color::Red),
        None => ("Loading...".to_string(), Color::DarkGray),
      };
      frame.render_widget(Paragraph::new(text).style(Style::default().fg(color)), inner);
      return;
    };

    let label = Style::default().fg(Color::DarkGray);
    let mut lines = vec![
      Line::from(Span::styled(donation.title.clone(), Style::default().bold())),
      Line::from(""),
      Line::from(vec![
        Span::styled("Status:    ", label),
        Span::styled(
          donation.status.to_string(),
          Style::default().fg(status_color(donation.status)),
        ),
      ]),
      Line::from(vec![
        Span::styled("Category:  ", label),
        Span::styled(
          donation.category.to_string(),
          Style::default().fg(category_color(donation.category)),
        ),
      ]),
      Line::from(vec![
        Span::styled("Condition: ", label),
        Span::raw(donation.condition.to_string().replace('_', " ")),
      ]),
      Line::from(vec![
        Span::styled("Location:  ", label),
        Span::raw(donation.location.clone()),
      ]),
      Line::from(vec![
        Span::styled("Listed:    ", label),
        Span::raw(donation.created_at.format("%Y-%m-%d %H:%M").to_string()),
      ]),
    ];
    if let Some(url) = &donation.image_url {
      lines.push(Line::from(vec![
        Span::styled("Image:     ", label),
        Span::styled(url.clone(), Style::default().fg(Color::Cyan)),
      ]));
    }
    if self.query.is_fetching() {
      lines.push(Line::from(Span::styled("refreshing...", label)));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled("─".repeat(inner.width as usize), label)));
    lines.push(Line::from(""));

    if donation.description.is_empty() {
      lines.push(Line::from(Span::styled("No description.", label)));
    } else {
      lines.extend(donation.description.lines().map(|l| Line::from(l.to_string())));
    }

    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
    frame.render_widget(paragraph, inner);
  }
}

impl View for DonationDetailView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match key.code {
      KeyCode::Char('r') => self.query.refetch(),
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    self.render_content(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    match self.query.data() {
      Some(donation) => truncate(&donation.title, 30),
      None => self.id.to_string(),
    }
  }

  fn tick(&mut self) {
    self.query.poll();
  }

  fn shortcuts(&self) -> Vec<Shortcut> {
    vec![
      Shortcut::new("r", "refresh").with_priority(10),
      Shortcut::new("q", "back").with_priority(90),
    ]
  }
}
