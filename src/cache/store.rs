//! In-memory query cache with request de-duplication and prefix invalidation.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::entry::{CacheEvent, CacheEventKind, CacheSnapshot, EntryStatus};
use super::key::QueryKey;
use crate::error::{DataError, DataResult};

type AnyValue = Arc<dyn Any + Send + Sync>;
type InFlight = Shared<BoxFuture<'static, DataResult<AnyValue>>>;

const EVENT_CAPACITY: usize = 256;

struct Entry {
  value: Option<AnyValue>,
  fetched_at: Option<Instant>,
  fetched_at_wall: Option<DateTime<Utc>>,
  stale_after: Duration,
  invalidated: bool,
  error: Option<DataError>,
  in_flight: Option<InFlight>,
  /// Id of the fetch currently allowed to complete this entry
  fetch_id: u64,
  /// Bumped on every invalidation
  epoch: u64,
}

impl Entry {
  fn new(stale_after: Duration) -> Self {
    Self {
      value: None,
      fetched_at: None,
      fetched_at_wall: None,
      stale_after,
      invalidated: false,
      error: None,
      in_flight: None,
      fetch_id: 0,
      epoch: 0,
    }
  }

  fn is_stale(&self) -> bool {
    if self.invalidated {
      return true;
    }
    match self.fetched_at {
      Some(at) => at.elapsed() >= self.stale_after,
      None => true,
    }
  }

  fn status(&self) -> EntryStatus {
    if self.in_flight.is_some() {
      EntryStatus::Fetching
    } else if self.error.is_some() {
      EntryStatus::Error
    } else if self.is_stale() {
      EntryStatus::Stale
    } else {
      EntryStatus::Fresh
    }
  }

  fn store(&mut self, value: AnyValue) {
    self.value = Some(value);
    self.fetched_at = Some(Instant::now());
    self.fetched_at_wall = Some(Utc::now());
    self.error = None;
    self.invalidated = false;
  }
}

struct Inner {
  entries: Mutex<HashMap<QueryKey, Entry>>,
  events: broadcast::Sender<CacheEvent>,
  next_fetch_id: AtomicU64,
  default_stale_time: Duration,
}

/// Process-wide store of fetched values keyed by [`QueryKey`].
///
/// Cloning is cheap and every clone shares the same entries. Create one at
/// startup and hand it to whatever needs it; tests build their own.
///
/// The entry lock is never held across an `.await`, so every operation is
/// atomic from the caller's point of view. A fetch runs on its own task and
/// stores its result even when every caller waiting on it has gone away.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Inner>,
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new()
  }
}

impl QueryCache {
  pub fn new() -> Self {
    Self::with_default_stale_time(Duration::from_secs(5 * 60))
  }

  /// Stale window used for entries created by [`QueryCache::set_value`].
  pub fn with_default_stale_time(stale_time: Duration) -> Self {
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    Self {
      inner: Arc::new(Inner {
        entries: Mutex::new(HashMap::new()),
        events,
        next_fetch_id: AtomicU64::new(1),
        default_stale_time: stale_time,
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
    self
      .inner
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  fn emit(&self, key: QueryKey, kind: CacheEventKind) {
    // No receivers is fine
    let _ = self.inner.events.send(CacheEvent { key, kind });
  }

  /// Receive a [`CacheEvent`] for every later change to any entry.
  pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
    self.inner.events.subscribe()
  }

  /// Current entry for `key`, or `None` if nothing was ever fetched or set.
  ///
  /// A stored value of a different type than `T` is reported as absent.
  pub fn get<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<CacheSnapshot<T>> {
    let entries = self.lock();
    let entry = entries.get(key)?;
    Some(CacheSnapshot {
      key: key.clone(),
      value: entry
        .value
        .clone()
        .and_then(|value| value.downcast::<T>().ok()),
      fetched_at: entry.fetched_at_wall,
      stale_after: entry.stale_after,
      status: entry.status(),
      error: entry.error.clone(),
    })
  }

  pub fn status(&self, key: &QueryKey) -> Option<EntryStatus> {
    self.lock().get(key).map(Entry::status)
  }

  /// All keys currently held, sorted.
  pub fn keys(&self) -> Vec<QueryKey> {
    let mut keys: Vec<QueryKey> = self.lock().keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  /// Return the cached value for `key`, loading it if needed.
  ///
  /// A fresh entry is returned without calling `loader`. Otherwise `loader`
  /// is invoked once and every concurrent caller for the same key waits on
  /// that single invocation. A failure is stored on the entry and returned
  /// to all waiters; the next call to `fetch` tries again.
  pub async fn fetch<T, F, Fut>(
    &self,
    key: &QueryKey,
    stale_after: Duration,
    loader: F,
  ) -> DataResult<Arc<T>>
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = DataResult<T>> + Send + 'static,
  {
    self.load(key, stale_after, loader, false).await
  }

  /// Like [`QueryCache::fetch`], but loads even when the entry is fresh.
  ///
  /// A fetch already in flight for `key` is joined instead.
  pub async fn refetch<T, F, Fut>(
    &self,
    key: &QueryKey,
    stale_after: Duration,
    loader: F,
  ) -> DataResult<Arc<T>>
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = DataResult<T>> + Send + 'static,
  {
    self.load(key, stale_after, loader, true).await
  }

  async fn load<T, F, Fut>(
    &self,
    key: &QueryKey,
    stale_after: Duration,
    loader: F,
    force: bool,
  ) -> DataResult<Arc<T>>
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = DataResult<T>> + Send + 'static,
  {
    let in_flight = {
      let mut entries = self.lock();
      let entry = entries
        .entry(key.clone())
        .or_insert_with(|| Entry::new(stale_after));
      entry.stale_after = stale_after;

      if let Some(in_flight) = &entry.in_flight {
        debug!(key = %key, "joining in-flight fetch");
        in_flight.clone()
      } else {
        if !force && entry.error.is_none() && !entry.is_stale() {
          if let Some(value) = entry
            .value
            .clone()
            .and_then(|value| value.downcast::<T>().ok())
          {
            return Ok(value);
          }
          warn!(key = %key, "cached value has a different type, refetching");
        }
        self.start_fetch(key, entry, loader)
      }
    };

    let value = in_flight.await?;
    value.downcast::<T>().map_err(|_| {
      DataError::decode(format!("value fetched for {} has an unexpected type", key))
    })
  }

  fn start_fetch<T, F, Fut>(&self, key: &QueryKey, entry: &mut Entry, loader: F) -> InFlight
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = DataResult<T>> + Send + 'static,
  {
    let fetch_id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
    let epoch = entry.epoch;
    debug!(key = %key, fetch_id, "starting fetch");

    let future = loader();
    let cache = self.clone();
    let task_key = key.clone();
    let task = tokio::spawn(async move {
      // A panicking loader still has to release the entry
      let result = match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result.map(|value| Arc::new(value) as AnyValue),
        Err(_) => Err(DataError::network("fetch task failed: loader panicked")),
      };
      cache.complete(task_key, fetch_id, epoch, &result);
      result
    });

    let in_flight = async move {
      task
        .await
        .unwrap_or_else(|e| Err(DataError::network(format!("fetch task failed: {}", e))))
    }
    .boxed()
    .shared();

    entry.in_flight = Some(in_flight.clone());
    entry.fetch_id = fetch_id;
    in_flight
  }

  fn complete(&self, key: QueryKey, fetch_id: u64, epoch: u64, result: &DataResult<AnyValue>) {
    let kind = {
      let mut entries = self.lock();
      let Some(entry) = entries.get_mut(&key) else {
        debug!(key = %key, fetch_id, "entry removed while fetching, dropping result");
        return;
      };
      if entry.fetch_id != fetch_id || entry.in_flight.is_none() {
        return;
      }
      entry.in_flight = None;

      match result {
        Ok(value) => {
          entry.store(Arc::clone(value));
          // Invalidated while the loader ran: the value may predate the write
          entry.invalidated = entry.epoch != epoch;
          debug!(key = %key, fetch_id, stale = entry.invalidated, "fetch completed");
          CacheEventKind::Updated
        }
        Err(e) => {
          warn!(key = %key, fetch_id, error = %e, "fetch failed");
          entry.error = Some(e.clone());
          CacheEventKind::Failed
        }
      }
    };
    self.emit(key, kind);
  }

  /// Mark every entry under `prefix` stale, keeping stored values.
  ///
  /// Returns the number of entries touched.
  pub fn invalidate(&self, prefix: &QueryKey) -> usize {
    let touched: Vec<QueryKey> = {
      let mut entries = self.lock();
      entries
        .iter_mut()
        .filter(|(key, _)| key.starts_with(prefix))
        .map(|(key, entry)| {
          entry.invalidated = true;
          entry.epoch += 1;
          key.clone()
        })
        .collect()
    };

    debug!(prefix = %prefix, count = touched.len(), "invalidated entries");
    let count = touched.len();
    for key in touched {
      self.emit(key, CacheEventKind::Invalidated);
    }
    count
  }

  /// Overwrite the value for `key` and mark it fresh, without a loader.
  ///
  /// A fetch still running for `key` is superseded: its result is dropped
  /// when it completes. A new entry gets the cache-wide default stale window.
  pub fn set_value<T: Send + Sync + 'static>(&self, key: &QueryKey, value: T) -> Arc<T> {
    self.put(key, value, None)
  }

  /// Like [`QueryCache::set_value`], but the entry goes stale after `stale_after`.
  pub fn set_value_for<T: Send + Sync + 'static>(
    &self,
    key: &QueryKey,
    value: T,
    stale_after: Duration,
  ) -> Arc<T> {
    self.put(key, value, Some(stale_after))
  }

  fn put<T: Send + Sync + 'static>(
    &self,
    key: &QueryKey,
    value: T,
    stale_after: Option<Duration>,
  ) -> Arc<T> {
    let value = Arc::new(value);
    {
      let mut entries = self.lock();
      let entry = entries
        .entry(key.clone())
        .or_insert_with(|| Entry::new(self.inner.default_stale_time));
      if let Some(stale_after) = stale_after {
        entry.stale_after = stale_after;
      }
      if entry.in_flight.take().is_some() {
        entry.fetch_id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "superseded in-flight fetch");
      }
      entry.store(Arc::clone(&value) as AnyValue);
    }
    debug!(key = %key, "value set directly");
    self.emit(key.clone(), CacheEventKind::Updated);
    value
  }

  /// Evict every entry under `prefix`. Results of fetches still running for
  /// those keys are dropped when they complete.
  pub fn remove(&self, prefix: &QueryKey) -> usize {
    let removed: Vec<QueryKey> = {
      let mut entries = self.lock();
      let keys: Vec<QueryKey> = entries
        .keys()
        .filter(|key| key.starts_with(prefix))
        .cloned()
        .collect();
      for key in &keys {
        entries.remove(key);
      }
      keys
    };

    debug!(prefix = %prefix, count = removed.len(), "removed entries");
    let count = removed.len();
    for key in removed {
      self.emit(key, CacheEventKind::Removed);
    }
    count
  }

  /// Evict everything.
  pub fn clear(&self) -> usize {
    self.remove(&QueryKey::new())
  }
}
