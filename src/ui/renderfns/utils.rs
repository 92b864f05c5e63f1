use chrono::{DateTime, Utc};
use ratatui::prelude::Color;
use sharecycle::model::{Category, DonationStatus};

/// Truncate a string to at most `max_chars` characters, adding "..." if truncated
pub fn truncate(s: &str, max_chars: usize) -> String {
  if s.chars().count() <= max_chars {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Display color for a listing status
pub fn status_color(status: DonationStatus) -> Color {
  match status {
    DonationStatus::Available => Color::Green,
    DonationStatus::Reserved => Color::Yellow,
    DonationStatus::Donated => Color::DarkGray,
  }
}

pub fn category_color(category: Category) -> Color {
  match category {
    Category::Clothing => Color::Magenta,
    Category::Furniture => Color::Yellow,
    Category::Electronics => Color::Cyan,
    Category::Books => Color::Blue,
    Category::Toys => Color::LightRed,
    Category::Kitchen => Color::LightGreen,
    Category::Other => Color::White,
  }
}

/// Short relative age like "5m", "3h" or "2d"
pub fn age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
  let secs = (now - at).num_seconds().max(0);
  match secs {
    0..=59 => "now".to_string(),
    60..=3599 => format!("{}m", secs / 60),
    3600..=86_399 => format!("{}h", secs / 3600),
    _ => format!("{}d", secs / 86_400),
  }
}
