//! Auth-session state mirrored from the backend.
//!
//! The backend pushes session changes through a [`SessionBus`]. Consumers
//! register a handler and get back a [`Subscription`]; dropping it (or calling
//! [`Subscription::unsubscribe`]) unregisters the handler.
//!
//! [`AuthSession`] is the session hook: it fetches the current session once,
//! then follows every pushed change. The most recent write always wins.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::DataError;
use crate::gateway::AuthGateway;
use crate::model::{Identity, Session};

/// Kind of session change pushed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventKind {
  InitialSession,
  SignedIn,
  SignedOut,
  TokenRefreshed,
  UserUpdated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
  pub kind: SessionEventKind,
  /// The session after the change; `None` when signed out
  pub session: Option<Session>,
}

impl SessionEvent {
  pub fn signed_in(session: Session) -> Self {
    Self {
      kind: SessionEventKind::SignedIn,
      session: Some(session),
    }
  }

  pub fn signed_out() -> Self {
    Self {
      kind: SessionEventKind::SignedOut,
      session: None,
    }
  }
}

pub type SessionHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
  handlers: Mutex<BTreeMap<u64, SessionHandler>>,
  next_id: AtomicU64,
}

/// Registry of session-change handlers.
#[derive(Clone, Default)]
pub struct SessionBus {
  inner: Arc<BusInner>,
}

impl SessionBus {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `handler`; it stays registered until the returned
  /// [`Subscription`] is dropped.
  pub fn register(&self, handler: SessionHandler) -> Subscription {
    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
    self
      .inner
      .handlers
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(id, handler);
    debug!(id, "session handler registered");
    Subscription {
      id,
      bus: Arc::downgrade(&self.inner),
    }
  }

  /// Deliver `event` to every registered handler, in registration order.
  pub fn emit(&self, event: &SessionEvent) {
    // Handlers run without the lock so they may unsubscribe themselves
    let handlers: Vec<SessionHandler> = self
      .inner
      .handlers
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .cloned()
      .collect();
    debug!(kind = ?event.kind, handlers = handlers.len(), "emitting session event");
    for handler in handlers {
      handler(event);
    }
  }

  pub fn handler_count(&self) -> usize {
    self
      .inner
      .handlers
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }
}

/// Registration token returned by [`SessionBus::register`].
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
  id: u64,
  bus: Weak<BusInner>,
}

impl Subscription {
  pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(bus) = self.bus.upgrade() {
      bus
        .handlers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&self.id);
      debug!(id = self.id, "session handler unregistered");
    }
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription").field("id", &self.id).finish()
  }
}

/// Session state exposed to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
  pub user: Option<Identity>,
  pub loading: bool,
  pub error: Option<DataError>,
}

impl AuthState {
  fn loading() -> Self {
    Self {
      user: None,
      loading: true,
      error: None,
    }
  }

  fn from_session(session: Option<&Session>) -> Self {
    Self {
      user: session.map(|s| s.user.clone()),
      loading: false,
      error: None,
    }
  }
}

/// Session hook: current user, loading flag and last error.
///
/// Dropping it cancels the initial fetch and unregisters from the bus, so
/// nothing writes to its state afterwards.
pub struct AuthSession {
  state: watch::Receiver<AuthState>,
  init_task: JoinHandle<()>,
  _subscription: Subscription,
}

impl AuthSession {
  /// Subscribe to session changes and fetch the current session once.
  pub fn init<G>(gateway: Arc<G>) -> Self
  where
    G: AuthGateway + ?Sized + 'static,
  {
    let (tx, rx) = watch::channel(AuthState::loading());
    let tx = Arc::new(tx);
    let notified = Arc::new(AtomicBool::new(false));

    let subscription = gateway.on_session_change(Arc::new({
      let tx = Arc::clone(&tx);
      let notified = Arc::clone(&notified);
      move |event: &SessionEvent| {
        notified.store(true, Ordering::SeqCst);
        tx.send_replace(AuthState::from_session(event.session.as_ref()));
      }
    }));

    let init_task = tokio::spawn(async move {
      let next = match gateway.current_session().await {
        Ok(session) => AuthState::from_session(session.as_ref()),
        Err(e) => AuthState {
          user: None,
          loading: false,
          error: Some(e),
        },
      };
      // A pushed change is newer than whatever this fetch saw
      tx.send_if_modified(|state| {
        if notified.load(Ordering::SeqCst) {
          debug!("session changed during initial fetch, discarding fetch result");
          return false;
        }
        *state = next;
        true
      });
    });

    Self {
      state: rx,
      init_task,
      _subscription: subscription,
    }
  }

  pub fn state(&self) -> AuthState {
    self.state.borrow().clone()
  }

  pub fn user(&self) -> Option<Identity> {
    self.state.borrow().user.clone()
  }

  pub fn is_loading(&self) -> bool {
    self.state.borrow().loading
  }

  /// Returns `true` once per change since the previous call.
  pub fn poll(&mut self) -> bool {
    if self.state.has_changed().unwrap_or(false) {
      self.state.borrow_and_update();
      true
    } else {
      false
    }
  }

  /// Wait for the next change.
  pub async fn changed(&mut self) -> bool {
    self.state.changed().await.is_ok()
  }

  /// Independent receiver of the same state.
  pub fn watch(&self) -> watch::Receiver<AuthState> {
    self.state.clone()
  }
}

impl Drop for AuthSession {
  fn drop(&mut self) {
    self.init_task.abort();
  }
}

/// Pick the identity to act as: an explicitly supplied one wins, otherwise
/// the session's user.
pub fn resolve_identity(explicit: Option<&Identity>, state: &AuthState) -> Option<Identity> {
  explicit.cloned().or_else(|| state.user.clone())
}
