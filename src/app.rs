use crate::event::{Event, EventHandler};
use crate::ui::renderfns::{draw_footer, draw_header};
use crate::ui::view::{View, ViewAction};
use crate::ui::views::DonationListView;
use crate::ui::ViewContext;
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use sharecycle::donations::DonationHooks;
use sharecycle::model::DonationFilters;
use sharecycle::session::{AuthSession, Subscription};
use std::io::stdout;
use std::time::Duration;
use tracing::info;

const TICK_RATE: Duration = Duration::from_millis(100);

/// Main application state
pub struct App {
  /// Navigation stack - root is always at index 0
  view_stack: Vec<Box<dyn View>>,

  /// Header title
  title: String,

  /// Backend location shown in the header
  host: String,

  /// Current user for the header; views read the same state via `ViewContext`
  auth: AuthSession,

  /// Drops per-user cache entries when the session ends
  _sign_out_cleanup: Subscription,

  should_quit: bool,
}

impl App {
  pub fn new(hooks: DonationHooks, auth: AuthSession, title: String, host: String) -> Self {
    let sign_out_cleanup = hooks.clear_on_sign_out();
    let ctx = ViewContext {
      hooks,
      auth: auth.watch(),
    };
    let root: Box<dyn View> = Box::new(DonationListView::new(ctx, DonationFilters::default()));

    Self {
      view_stack: vec![root],
      title,
      host,
      auth,
      _sign_out_cleanup: sign_out_cleanup,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = self.event_loop(&mut terminal).await;

    // Restore the terminal even if the loop failed
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    result
  }

  async fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>) -> Result<()> {
    let mut events = EventHandler::new(TICK_RATE);
    info!("tui started");

    while !self.should_quit {
      terminal.draw(|frame| self.draw(frame))?;

      match events.next().await {
        Some(Event::Key(key)) => self.handle_key(key),
        Some(Event::Tick) => self.tick(),
        Some(Event::Resize) => {}
        None => break,
      }
    }

    info!("tui stopped");
    Ok(())
  }

  fn tick(&mut self) {
    self.auth.poll();
    // Views below the top keep their queries current too
    for view in &mut self.view_stack {
      view.tick();
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
      self.should_quit = true;
      return;
    }

    let Some(view) = self.view_stack.last_mut() else {
      self.should_quit = true;
      return;
    };

    match view.handle_key(key) {
      ViewAction::None => {}
      ViewAction::Push(view) => self.view_stack.push(view),
      ViewAction::Pop => {
        self.view_stack.pop();
        if self.view_stack.is_empty() {
          self.should_quit = true;
        }
      }
    }
  }

  fn draw(&mut self, frame: &mut Frame) {
    let chunks = Layout::default()
      .direction(Direction::Vertical)
      .constraints([
        Constraint::Length(1), // Header
        Constraint::Min(1),    // Current view
        Constraint::Length(1), // Footer
      ])
      .split(frame.area());

    let breadcrumb: Vec<String> = self.view_stack.iter().map(|v| v.breadcrumb_label()).collect();
    let Some(view) = self.view_stack.last_mut() else {
      return;
    };

    draw_header(frame, chunks[0], &self.title, &self.host, &self.auth.state(), &view.shortcuts());
    view.render(frame, chunks[1]);
    draw_footer(frame, chunks[2], &breadcrumb, view.status_message().as_ref());
  }
}
