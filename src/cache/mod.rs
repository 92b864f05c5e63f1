//! Client-side query cache.
//!
//! This module provides a domain-agnostic cache that:
//! - Stores the last fetched value per hierarchical [`QueryKey`]
//! - Tracks freshness with a per-entry stale window
//! - De-duplicates concurrent fetches of the same key
//! - Invalidates or evicts whole key subtrees by prefix
//! - Publishes change events so observers can react

mod entry;
mod key;
mod store;

pub use entry::{CacheEvent, CacheEventKind, CacheSnapshot, EntryStatus};
pub use key::{KeyPart, QueryKey};
pub use store::QueryCache;
