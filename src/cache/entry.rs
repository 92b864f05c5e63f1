//! Entry status, snapshots and change events published by the cache.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::key::QueryKey;
use crate::error::DataError;

/// Freshness state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
  /// Value present and younger than its stale window
  Fresh,
  /// Value older than its stale window, or invalidated
  Stale,
  /// A loader is running for this key
  Fetching,
  /// The last loader failed
  Error,
}

/// Point-in-time copy of a cache entry.
#[derive(Debug, Clone)]
pub struct CacheSnapshot<T> {
  pub key: QueryKey,
  /// Last stored value; kept through invalidation and failed refetches
  pub value: Option<Arc<T>>,
  /// When the value was last stored
  pub fetched_at: Option<DateTime<Utc>>,
  pub stale_after: Duration,
  pub status: EntryStatus,
  /// Error of the last fetch, if it failed
  pub error: Option<DataError>,
}

impl<T> CacheSnapshot<T> {
  pub fn is_fresh(&self) -> bool {
    self.status == EntryStatus::Fresh
  }
}

/// What happened to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
  /// A value was stored by a fetch or by `set_value`
  Updated,
  /// A fetch failed and the error was stored
  Failed,
  /// The entry was marked stale
  Invalidated,
  /// The entry was evicted
  Removed,
}

/// Change notification for a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
  pub key: QueryKey,
  pub kind: CacheEventKind,
}
