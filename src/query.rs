//! Query hook: a typed view of one cache entry for a UI component.
//!
//! A `QueryObserver<T>` binds a [`QueryKey`], a loader and a stale time to a
//! view. Mounting it fetches through the shared [`QueryCache`] when the entry
//! is absent or stale; the view then calls [`QueryObserver::poll`] on every
//! tick to pick up results and react to invalidations made elsewhere.
//!
//! # Example
//!
//! ```ignore
//! let key = DonationKey::List { filters: filters.clone() }.query_key();
//! let mut query = QueryObserver::new(cache.clone(), key, move || {
//!     let backend = Arc::clone(&backend);
//!     let filters = filters.clone();
//!     async move { backend.list_donations(&filters).await }
//! });
//!
//! query.mount();
//!
//! // In event loop tick
//! if query.poll() {
//!     // Result changed, trigger re-render
//! }
//!
//! // In render
//! let result = query.result();
//! if result.is_loading { render_spinner() }
//! ```

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::cache::{CacheEvent, CacheEventKind, EntryStatus, QueryCache, QueryKey};
use crate::error::{DataError, DataResult};

type LoaderFn<T> = Arc<dyn Fn() -> BoxFuture<'static, DataResult<T>> + Send + Sync>;

/// What a view renders from a query.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
  /// Last value seen, possibly stale
  pub data: Option<Arc<T>>,
  /// Fetching with nothing to show yet
  pub is_loading: bool,
  /// A fetch is running, with or without data on screen
  pub is_fetching: bool,
  pub error: Option<DataError>,
}

impl<T> QueryResult<T> {
  pub fn data(&self) -> Option<&T> {
    self.data.as_deref()
  }
}

/// Mounted subscription of one view to one cache key.
///
/// Dropping the observer (or calling [`QueryObserver::unmount`]) drops its
/// receivers: a fetch still running completes into the cache but nothing is
/// delivered to the torn-down view.
pub struct QueryObserver<T> {
  cache: QueryCache,
  key: QueryKey,
  stale_time: Duration,
  loader: LoaderFn<T>,
  data: Option<Arc<T>>,
  error: Option<DataError>,
  receiver: Option<mpsc::UnboundedReceiver<DataResult<Arc<T>>>>,
  events: Option<broadcast::Receiver<CacheEvent>>,
  invalidated_in_flight: bool,
}

impl<T: Send + Sync + 'static> QueryObserver<T> {
  /// Create an unmounted observer. `loader` is called by the cache, at most
  /// once per fetch shared by every observer of `key`.
  pub fn new<F, Fut>(cache: QueryCache, key: QueryKey, loader: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DataResult<T>> + Send + 'static,
  {
    Self {
      cache,
      key,
      stale_time: Duration::from_secs(60),
      loader: Arc::new(move || loader().boxed()),
      data: None,
      error: None,
      receiver: None,
      events: None,
      invalidated_in_flight: false,
    }
  }

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn is_mounted(&self) -> bool {
    self.events.is_some()
  }

  /// Start following the cache entry. Shows whatever is cached right away
  /// and fetches if the entry is absent, stale or failed.
  pub fn mount(&mut self) {
    if self.is_mounted() {
      return;
    }
    self.events = Some(self.cache.subscribe());
    self.sync_from_cache();

    let needs_fetch = !matches!(self.cache.status(&self.key), Some(EntryStatus::Fresh));
    debug!(key = %self.key, needs_fetch, "query mounted");
    if needs_fetch {
      self.start_fetch(false);
    }
  }

  /// Stop following the entry. Results of a fetch still running are not
  /// applied to this observer.
  pub fn unmount(&mut self) {
    if self.events.take().is_some() {
      debug!(key = %self.key, "query unmounted");
    }
    self.receiver = None;
    self.invalidated_in_flight = false;
  }

  /// Load again even if the cached value is fresh.
  pub fn refetch(&mut self) {
    if !self.is_mounted() {
      self.mount();
      return;
    }
    self.start_fetch(true);
  }

  /// Current data, loading flags and error.
  pub fn result(&self) -> QueryResult<T> {
    let is_fetching = self.receiver.is_some();
    QueryResult {
      data: self.data.clone(),
      is_loading: is_fetching && self.data.is_none(),
      is_fetching,
      error: self.error.clone(),
    }
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_deref()
  }

  pub fn error(&self) -> Option<&DataError> {
    self.error.as_ref()
  }

  pub fn is_loading(&self) -> bool {
    self.receiver.is_some() && self.data.is_none()
  }

  pub fn is_fetching(&self) -> bool {
    self.receiver.is_some()
  }

  /// Whether the cache considers the entry stale (or it is gone).
  pub fn is_stale(&self) -> bool {
    !matches!(
      self.cache.status(&self.key),
      Some(EntryStatus::Fresh) | Some(EntryStatus::Fetching)
    )
  }

  /// Apply pending cache changes and fetch results.
  ///
  /// Returns `true` if the result changed. Call this in the event loop tick.
  pub fn poll(&mut self) -> bool {
    if !self.is_mounted() {
      return false;
    }
    let mut changed = self.poll_events();

    let Some(receiver) = &mut self.receiver else {
      return changed;
    };
    match receiver.try_recv() {
      Ok(Ok(data)) => {
        self.data = Some(data);
        self.error = None;
        self.receiver = None;
        changed = true;
      }
      Ok(Err(error)) => {
        self.error = Some(error);
        self.receiver = None;
        changed = true;
      }
      Err(mpsc::error::TryRecvError::Empty) => return changed,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.receiver = None;
        changed = true;
      }
    }

    // Invalidated while our fetch ran: the value just received may be older
    // than the write that invalidated it
    if std::mem::take(&mut self.invalidated_in_flight)
      && self.cache.status(&self.key) == Some(EntryStatus::Stale)
    {
      debug!(key = %self.key, "entry invalidated during fetch, refetching");
      self.start_fetch(false);
    }
    changed
  }

  fn poll_events(&mut self) -> bool {
    let stale_now = self.is_stale();
    let Some(events) = &mut self.events else {
      return false;
    };

    let mut resync = false;
    let mut refetch = false;
    let mut removed = false;
    loop {
      match events.try_recv() {
        Ok(event) if event.key == self.key => match event.kind {
          CacheEventKind::Updated | CacheEventKind::Failed => resync = true,
          CacheEventKind::Invalidated => refetch = true,
          CacheEventKind::Removed => {
            removed = true;
            refetch = true;
          }
        },
        Ok(_) => {}
        Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
          debug!(key = %self.key, skipped, "cache events lagged, resyncing");
          resync = true;
          refetch = stale_now;
        }
        Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => {
          break;
        }
      }
    }

    let mut changed = false;
    if removed && self.receiver.is_none() {
      self.data = None;
      changed = true;
    }
    if resync {
      changed |= self.sync_from_cache();
    }
    if refetch {
      if self.receiver.is_some() {
        self.invalidated_in_flight = true;
      } else {
        self.start_fetch(false);
        changed = true;
      }
    }
    changed
  }

  /// Copy the cached value and error into this observer.
  fn sync_from_cache(&mut self) -> bool {
    let Some(snapshot) = self.cache.get::<T>(&self.key) else {
      return false;
    };
    let mut changed = false;
    if let Some(value) = snapshot.value {
      if !self.data.as_ref().is_some_and(|d| Arc::ptr_eq(d, &value)) {
        self.data = Some(value);
        changed = true;
      }
    }
    if self.error != snapshot.error {
      self.error = snapshot.error;
      changed = true;
    }
    changed
  }

  fn start_fetch(&mut self, force: bool) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.invalidated_in_flight = false;

    let cache = self.cache.clone();
    let key = self.key.clone();
    let stale_time = self.stale_time;
    let loader = Arc::clone(&self.loader);
    tokio::spawn(async move {
      let load = move || loader();
      let result = if force {
        cache.refetch(&key, stale_time, load).await
      } else {
        cache.fetch(&key, stale_time, load).await
      };
      // Ignore send errors - the observer may have been unmounted
      let _ = tx.send(result);
    });
  }
}

impl<T> std::fmt::Debug for QueryObserver<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryObserver")
      .field("key", &self.key)
      .field("stale_time", &self.stale_time)
      .field("mounted", &self.events.is_some())
      .field("fetching", &self.receiver.is_some())
      .finish_non_exhaustive()
  }
}
