use ratatui::prelude::*;
use ratatui::widgets::Paragraph;
use sharecycle::session::AuthState;

use crate::ui::view::Shortcut;

/// Draw the header bar with title, host, signed-in user and shortcuts
pub fn draw_header(
  frame: &mut Frame,
  area: Rect,
  title: &str,
  host: &str,
  auth: &AuthState,
  shortcuts: &[Shortcut],
) {
  let user = if auth.loading {
    Span::styled(" ... ", Style::default().fg(Color::DarkGray))
  } else if let Some(user) = &auth.user {
    Span::styled(format!(" {} ", user.label()), Style::default().fg(Color::Yellow).bold())
  } else {
    Span::styled(" not signed in ", Style::default().fg(Color::DarkGray))
  };

  let mut spans = vec![
    Span::styled(format!(" {} ", title), Style::default().fg(Color::Cyan).bold()),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(format!(" {} ", extract_host(host)), Style::default().fg(Color::White)),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    user,
    Span::raw(" "),
  ];

  let mut shortcuts = shortcuts.to_vec();
  shortcuts.sort_by_key(|s| s.priority);
  for shortcut in shortcuts {
    // Keys highlighted, descriptions dimmed
    spans.push(Span::raw("  "));
    spans.push(Span::styled(format!("<{}>", shortcut.key), Style::default().fg(Color::Cyan)));
    spans.push(Span::styled(
      format!(" {}", shortcut.label),
      Style::default().fg(Color::DarkGray),
    ));
  }

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
  frame.render_widget(paragraph, area);
}

/// Host part of a backend URL
fn extract_host(url: &str) -> &str {
  url
    .strip_prefix("https://")
    .or_else(|| url.strip_prefix("http://"))
    .unwrap_or(url)
    .split('/')
    .next()
    .unwrap_or(url)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_extract_host() {
    assert_eq!(extract_host("https://abc.supabase.co"), "abc.supabase.co");
    assert_eq!(extract_host("https://api.example.org/rest/v1"), "api.example.org");
    assert_eq!(extract_host("http://localhost:54321/"), "localhost:54321");
    assert_eq!(extract_host("memory"), "memory");
  }
}
