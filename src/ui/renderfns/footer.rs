use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use crate::ui::view::StatusMessage;

/// Draw the footer bar with the view breadcrumb and an optional message
pub fn draw_footer(frame: &mut Frame, area: Rect, breadcrumb: &[String], message: Option<&StatusMessage>) {
  let mut spans = vec![Span::raw(" ")];

  for (i, part) in breadcrumb.iter().enumerate() {
    if i > 0 {
      spans.push(Span::styled(" > ", Style::default().fg(Color::DarkGray)));
    }

    let style = if i == breadcrumb.len() - 1 {
      // Current view
      Style::default().fg(Color::Cyan).bold()
    } else {
      Style::default().fg(Color::White)
    };

    spans.push(Span::styled(part.clone(), style));
  }

  if let Some(message) = message {
    spans.push(Span::styled("  │  ", Style::default().fg(Color::DarkGray)));
    spans.push(Span::styled(message.text().to_string(), Style::default().fg(message.color())));
  }

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
  frame.render_widget(paragraph, area);
}
