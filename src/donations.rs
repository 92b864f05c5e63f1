//! Donation queries and mutations bound to the shared cache.
//!
//! Keys follow one hierarchy so a single prefix invalidates a whole family:
//!
//! ```text
//! donations
//! ├── list   .{filters}
//! ├── detail .#id
//! └── user   .#owner_id
//! ```
//!
//! Every write reconciles list and detail views: lists and owner lists are
//! invalidated, the detail entry is patched with the returned row (or evicted
//! after a delete).

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{QueryCache, QueryKey};
use crate::error::DataResult;
use crate::gateway::{AuthGateway, Backend};
use crate::model::{Donation, DonationFilters, DonationId, DonationPatch, NewDonation};
use crate::mutation::Mutation;
use crate::query::QueryObserver;
use crate::session::{SessionEvent, SessionEventKind, Subscription};

/// Cache key of a donation query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DonationKey {
  /// Browse listings matching filters
  List { filters: DonationFilters },
  /// A single listing
  Detail { id: DonationId },
  /// Listings owned by one user
  ByOwner { owner_id: String },
}

impl DonationKey {
  /// Prefix of every donation key.
  pub fn all() -> QueryKey {
    QueryKey::root("donations")
  }

  pub fn lists() -> QueryKey {
    Self::all().name("list")
  }

  pub fn details() -> QueryKey {
    Self::all().name("detail")
  }

  pub fn owners() -> QueryKey {
    Self::all().name("user")
  }

  pub fn query_key(&self) -> QueryKey {
    match self {
      Self::List { filters } => Self::lists().params(filters.params()),
      Self::Detail { id } => Self::details().id(id.as_str()),
      Self::ByOwner { owner_id } => Self::owners().id(owner_id.as_str()),
    }
  }

  pub fn description(&self) -> String {
    match self {
      Self::List { filters } if filters.is_empty() => "all donations".to_string(),
      Self::List { filters } => {
        let parts: Vec<String> = filters
          .params()
          .into_iter()
          .map(|(k, v)| format!("{}={}", k, v))
          .collect();
        format!("donations where {}", parts.join(", "))
      }
      Self::Detail { id } => format!("donation {}", id),
      Self::ByOwner { owner_id } => format!("donations of {}", owner_id),
    }
  }
}

/// How long each kind of donation query stays fresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StalePolicy {
  pub list: Duration,
  pub detail: Duration,
}

impl Default for StalePolicy {
  fn default() -> Self {
    Self {
      list: Duration::from_secs(60),
      detail: Duration::from_secs(5 * 60),
    }
  }
}

/// Input of the update mutation.
#[derive(Clone, Debug, PartialEq)]
pub struct DonationUpdate {
  pub id: DonationId,
  pub patch: DonationPatch,
}

/// Factory for donation query observers and mutations.
///
/// Cheap to clone; every clone shares the backend and the cache.
#[derive(Clone)]
pub struct DonationHooks {
  backend: Arc<dyn Backend>,
  cache: QueryCache,
  policy: StalePolicy,
}

impl DonationHooks {
  pub fn new(backend: Arc<dyn Backend>, cache: QueryCache) -> Self {
    Self {
      backend,
      cache,
      policy: StalePolicy::default(),
    }
  }

  pub fn with_policy(mut self, policy: StalePolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn backend(&self) -> &Arc<dyn Backend> {
    &self.backend
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  // ==========================================================================
  // Queries
  // ==========================================================================

  pub fn list(&self, filters: DonationFilters) -> QueryObserver<Vec<Donation>> {
    let key = DonationKey::List {
      filters: filters.clone(),
    };
    let backend = Arc::clone(&self.backend);
    QueryObserver::new(self.cache.clone(), key.query_key(), move || {
      let backend = Arc::clone(&backend);
      let filters = filters.clone();
      async move { backend.list_donations(&filters).await }
    })
    .with_stale_time(self.policy.list)
  }

  pub fn detail(&self, id: DonationId) -> QueryObserver<Donation> {
    let key = DonationKey::Detail { id: id.clone() };
    let backend = Arc::clone(&self.backend);
    QueryObserver::new(self.cache.clone(), key.query_key(), move || {
      let backend = Arc::clone(&backend);
      let id = id.clone();
      async move { backend.get_donation(&id).await }
    })
    .with_stale_time(self.policy.detail)
  }

  pub fn owned_by(&self, owner_id: impl Into<String>) -> QueryObserver<Vec<Donation>> {
    let owner_id = owner_id.into();
    let key = DonationKey::ByOwner {
      owner_id: owner_id.clone(),
    };
    let backend = Arc::clone(&self.backend);
    QueryObserver::new(self.cache.clone(), key.query_key(), move || {
      let backend = Arc::clone(&backend);
      let owner_id = owner_id.clone();
      async move { backend.list_user_donations(&owner_id).await }
    })
    .with_stale_time(self.policy.list)
  }

  /// Listings matching `filters`, through the cache.
  pub async fn fetch_list(&self, filters: &DonationFilters) -> DataResult<Arc<Vec<Donation>>> {
    let key = DonationKey::List {
      filters: filters.clone(),
    };
    debug!(query = %key.description(), "fetching");
    let backend = Arc::clone(&self.backend);
    let filters = filters.clone();
    self
      .cache
      .fetch(&key.query_key(), self.policy.list, move || async move {
        backend.list_donations(&filters).await
      })
      .await
  }

  pub async fn fetch_detail(&self, id: &DonationId) -> DataResult<Arc<Donation>> {
    let key = DonationKey::Detail { id: id.clone() };
    debug!(query = %key.description(), "fetching");
    let backend = Arc::clone(&self.backend);
    let id = id.clone();
    self
      .cache
      .fetch(&key.query_key(), self.policy.detail, move || async move {
        backend.get_donation(&id).await
      })
      .await
  }

  pub async fn fetch_owned_by(&self, owner_id: &str) -> DataResult<Arc<Vec<Donation>>> {
    let key = DonationKey::ByOwner {
      owner_id: owner_id.to_string(),
    };
    debug!(query = %key.description(), "fetching");
    let backend = Arc::clone(&self.backend);
    let owner_id = owner_id.to_string();
    self
      .cache
      .fetch(&key.query_key(), self.policy.list, move || async move {
        backend.list_user_donations(&owner_id).await
      })
      .await
  }

  // ==========================================================================
  // Mutations
  // ==========================================================================

  pub fn create(&self) -> Mutation<NewDonation, Donation> {
    let backend = Arc::clone(&self.backend);
    let detail_stale = self.policy.detail;
    Mutation::new("create_donation", self.cache.clone(), move |input: NewDonation| {
      let backend = Arc::clone(&backend);
      async move { backend.create_donation(&input).await }
    })
    .on_success(move |cache, _, created| reconcile_saved(cache, created, detail_stale))
  }

  pub fn update(&self) -> Mutation<DonationUpdate, Donation> {
    let backend = Arc::clone(&self.backend);
    let detail_stale = self.policy.detail;
    Mutation::new("update_donation", self.cache.clone(), move |input: DonationUpdate| {
      let backend = Arc::clone(&backend);
      async move { backend.update_donation(&input.id, &input.patch).await }
    })
    .on_success(move |cache, _, updated| reconcile_saved(cache, updated, detail_stale))
  }

  pub fn delete(&self) -> Mutation<DonationId, ()> {
    let backend = Arc::clone(&self.backend);
    Mutation::new("delete_donation", self.cache.clone(), move |id: DonationId| {
      let backend = Arc::clone(&backend);
      async move { backend.delete_donation(&id).await }
    })
    .on_success(|cache, id, _| reconcile_deleted(cache, id))
  }

  /// Evict owner lists whenever the user signs out, so one account's
  /// listings are never shown to the next.
  pub fn clear_on_sign_out(&self) -> Subscription {
    let cache = self.cache.clone();
    self.backend.on_session_change(Arc::new(move |event: &SessionEvent| {
      if event.kind == SessionEventKind::SignedOut {
        let removed = cache.remove(&DonationKey::owners());
        debug!(removed, "cleared owner listings after sign-out");
      }
    }))
  }
}

/// After a create or update: lists may now include or order the row
/// differently, the detail entry is exactly the returned row.
fn reconcile_saved(cache: &QueryCache, donation: &Donation, detail_stale: Duration) {
  cache.invalidate(&DonationKey::lists());
  cache.invalidate(&DonationKey::owners());
  let key = DonationKey::Detail {
    id: donation.id.clone(),
  };
  cache.set_value_for(&key.query_key(), donation.clone(), detail_stale);
}

fn reconcile_deleted(cache: &QueryCache, id: &DonationId) {
  cache.invalidate(&DonationKey::lists());
  cache.invalidate(&DonationKey::owners());
  cache.remove(&DonationKey::Detail { id: id.clone() }.query_key());
}

impl std::fmt::Debug for DonationHooks {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DonationHooks")
      .field("policy", &self.policy)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::EntryStatus;
  use crate::error::DataError;
  use crate::gateway::memory::MemoryBackend;
  use crate::model::{Category, Condition, DonationStatus};

  async fn signed_in_hooks() -> (Arc<MemoryBackend>, DonationHooks) {
    let backend = Arc::new(MemoryBackend::seeded());
    backend
      .sign_in("demo@sharecycle.local", "demo")
      .await
      .unwrap();
    let hooks = DonationHooks::new(backend.clone(), QueryCache::new());
    (backend, hooks)
  }

  fn new_donation(title: &str) -> NewDonation {
    NewDonation {
      title: title.to_string(),
      description: "Still works".to_string(),
      category: Category::Electronics,
      condition: Condition::Good,
      location: "Riverside".to_string(),
      image_url: None,
    }
  }

  #[test]
  fn test_key_hierarchy() {
    let list = DonationKey::List {
      filters: DonationFilters {
        category: Some(Category::Books),
        ..Default::default()
      },
    }
    .query_key();
    let detail = DonationKey::Detail {
      id: DonationId::from("d-1"),
    }
    .query_key();
    let mine = DonationKey::ByOwner {
      owner_id: "user-1".to_string(),
    }
    .query_key();

    assert!(list.starts_with(&DonationKey::lists()));
    assert!(detail.starts_with(&DonationKey::details()));
    assert!(mine.starts_with(&DonationKey::owners()));
    assert!(!detail.starts_with(&DonationKey::lists()));
    for key in [&list, &detail, &mine] {
      assert!(key.starts_with(&DonationKey::all()));
    }
    assert_eq!(list.to_string(), "donations.list.{category=books}");
    assert_eq!(detail.to_string(), "donations.detail.#d-1");
  }

  #[test]
  fn test_equivalent_filters_share_a_key() {
    let a = DonationKey::List {
      filters: DonationFilters {
        search: Some("Lamp ".to_string()),
        location: Some("  ".to_string()),
        ..Default::default()
      },
    };
    let b = DonationKey::List {
      filters: DonationFilters {
        search: Some("lamp".to_string()),
        ..Default::default()
      },
    };
    assert_eq!(a.query_key(), b.query_key());
    assert_eq!(a.description(), "donations where search=lamp");
  }

  #[tokio::test]
  async fn test_fetch_list_is_cached() {
    let (backend, hooks) = signed_in_hooks().await;

    let first = hooks.fetch_list(&DonationFilters::default()).await.unwrap();
    let second = hooks.fetch_list(&DonationFilters::default()).await.unwrap();

    assert_eq!(first.len(), 6);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(backend.calls("list_donations"), 1);
  }

  #[tokio::test]
  async fn test_create_invalidates_lists_and_patches_detail() {
    let (backend, hooks) = signed_in_hooks().await;
    let me = backend.current_session().await.unwrap().unwrap().user;
    hooks.fetch_list(&DonationFilters::default()).await.unwrap();
    hooks.fetch_owned_by(&me.id).await.unwrap();

    let created = hooks.create().run(new_donation("Radio")).await.unwrap();

    let cache = hooks.cache();
    let list_key = DonationKey::List {
      filters: DonationFilters::default(),
    }
    .query_key();
    let mine_key = DonationKey::ByOwner {
      owner_id: me.id.clone(),
    }
    .query_key();
    assert_eq!(cache.status(&list_key), Some(EntryStatus::Stale));
    assert_eq!(cache.status(&mine_key), Some(EntryStatus::Stale));

    // Detail served from the patched entry, no round trip
    let detail = hooks.fetch_detail(&created.id).await.unwrap();
    assert_eq!(detail.title, "Radio");
    assert_eq!(backend.calls("get_donation"), 0);

    // Lists refetch on next access and include the new row
    let list = hooks.fetch_list(&DonationFilters::default()).await.unwrap();
    assert_eq!(list.len(), 7);
    assert_eq!(backend.calls("list_donations"), 2);
  }

  #[tokio::test]
  async fn test_update_patches_detail_with_returned_row() {
    let (backend, hooks) = signed_in_hooks().await;
    let id = DonationId::from("demo-1");
    let before = hooks.fetch_detail(&id).await.unwrap();
    assert_eq!(before.status, DonationStatus::Available);

    hooks
      .update()
      .run(DonationUpdate {
        id: id.clone(),
        patch: DonationPatch::status(DonationStatus::Reserved),
      })
      .await
      .unwrap();

    let after = hooks.fetch_detail(&id).await.unwrap();
    assert_eq!(after.status, DonationStatus::Reserved);
    assert_eq!(backend.calls("get_donation"), 1);
  }

  #[tokio::test]
  async fn test_created_detail_uses_detail_stale_window() {
    let (_backend, hooks) = signed_in_hooks().await;
    let hooks = hooks.with_policy(StalePolicy {
      list: Duration::from_secs(60),
      detail: Duration::from_secs(7),
    });

    let created = hooks.create().run(new_donation("Kettle")).await.unwrap();

    let key = DonationKey::Detail { id: created.id.clone() }.query_key();
    let snapshot = hooks.cache().get::<Donation>(&key).unwrap();
    assert_eq!(snapshot.stale_after, Duration::from_secs(7));
    assert_eq!(snapshot.status, EntryStatus::Fresh);
  }

  #[tokio::test]
  async fn test_delete_evicts_detail() {
    let (_backend, hooks) = signed_in_hooks().await;
    let id = DonationId::from("demo-1");
    hooks.fetch_detail(&id).await.unwrap();

    hooks.delete().run(id.clone()).await.unwrap();

    let key = DonationKey::Detail { id: id.clone() }.query_key();
    assert_eq!(hooks.cache().status(&key), None);
    let err = hooks.fetch_detail(&id).await.unwrap_err();
    assert_eq!(err, DataError::not_found("donation", "demo-1"));
  }

  #[tokio::test]
  async fn test_failed_write_leaves_cache_alone() {
    let (_backend, hooks) = signed_in_hooks().await;
    hooks.fetch_list(&DonationFilters::default()).await.unwrap();
    let keys_before = hooks.cache().keys();

    // demo-2 belongs to another account
    let err = hooks
      .update()
      .run(DonationUpdate {
        id: DonationId::from("demo-2"),
        patch: DonationPatch::status(DonationStatus::Donated),
      })
      .await
      .unwrap_err();

    assert!(matches!(err, DataError::Backend { status: 403, .. }));
    assert_eq!(hooks.cache().keys(), keys_before);
    for key in keys_before {
      assert_eq!(hooks.cache().status(&key), Some(EntryStatus::Fresh));
    }
  }

  #[tokio::test]
  async fn test_list_observer_refetches_after_create() {
    let (backend, hooks) = signed_in_hooks().await;
    let mut list = hooks.list(DonationFilters::default());
    list.mount();
    while list.is_fetching() {
      tokio::time::sleep(Duration::from_millis(2)).await;
      list.poll();
    }
    assert_eq!(list.data().map(Vec::len), Some(6));

    hooks.create().run(new_donation("Toaster")).await.unwrap();
    assert!(list.poll());
    while list.is_fetching() {
      tokio::time::sleep(Duration::from_millis(2)).await;
      list.poll();
    }

    assert_eq!(list.data().map(Vec::len), Some(7));
    assert_eq!(backend.calls("list_donations"), 2);
  }

  #[tokio::test]
  async fn test_sign_out_clears_owner_lists() {
    let (backend, hooks) = signed_in_hooks().await;
    let _subscription = hooks.clear_on_sign_out();
    let me = backend.current_session().await.unwrap().unwrap().user;
    hooks.fetch_owned_by(&me.id).await.unwrap();
    hooks.fetch_list(&DonationFilters::default()).await.unwrap();

    backend.sign_out().await.unwrap();

    let keys = hooks.cache().keys();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with(&DonationKey::lists()));
  }
}
