use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};
use std::time::Duration;
use tokio::sync::mpsc;

/// Terminal events fed to the app loop
#[derive(Debug)]
pub enum Event {
  /// Key press (releases are filtered out)
  Key(KeyEvent),
  /// Terminal was resized, redraw
  Resize,
  /// Periodic tick for polling queries and mutations
  Tick,
}

/// Reads crossterm input on a blocking thread and emits a tick whenever no
/// input arrived within `tick_rate`.
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // crossterm's poll/read block the thread
    tokio::task::spawn_blocking(move || loop {
      let event = match event::poll(tick_rate) {
        Ok(true) => match event::read() {
          Ok(CrosstermEvent::Key(key)) if key.kind == KeyEventKind::Press => Event::Key(key),
          Ok(CrosstermEvent::Resize(_, _)) => Event::Resize,
          Ok(_) => continue,
          Err(_) => break,
        },
        Ok(false) => Event::Tick,
        Err(_) => break,
      };
      if tx.send(event).is_err() {
        break;
      }
    });

    Self { rx }
  }

  /// Next event, `None` once the reader has stopped
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
