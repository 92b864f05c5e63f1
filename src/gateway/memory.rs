//! In-process backend used by tests and the offline demo.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{AuthGateway, DonationGateway};
use crate::error::{DataError, DataResult};
use crate::model::{
  Category, Condition, Donation, DonationFilters, DonationId, DonationPatch, DonationStatus,
  Identity, NewDonation, Session,
};
use crate::session::{SessionBus, SessionEvent, SessionHandler, Subscription};

struct Account {
  identity: Identity,
  password: String,
}

#[derive(Default)]
struct State {
  donations: Vec<Donation>,
  accounts: Vec<Account>,
  session: Option<Session>,
  next_id: u64,
  calls: HashMap<&'static str, usize>,
  fail_next: Option<DataError>,
}

/// Backend that keeps accounts, the session and listings in memory.
///
/// Enforces the same rules the hosted backend does for the client: listing
/// requires a session, only owners may change or delete a listing, and a
/// listing needs a title.
#[derive(Default)]
pub struct MemoryBackend {
  state: Mutex<State>,
  bus: SessionBus,
  latency: Option<Duration>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Delay every call by `latency`, to make in-flight windows observable.
  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = Some(latency);
    self
  }

  /// A backend with a demo account (`demo@sharecycle.local` / `demo`) and a
  /// handful of listings.
  pub fn seeded() -> Self {
    let backend = Self::new();
    let owner = backend.add_user("demo@sharecycle.local", "demo", Some("Demo Donor"));
    let neighbour = backend.add_user("sam@sharecycle.local", "sam", Some("Sam"));

    let samples = [
      (&owner, "Oak bookshelf", "Five shelves, a few scratches on the side.", Category::Furniture, Condition::Good, "Riverside"),
      (&neighbour, "Children's picture books", "Box of about 30 books, ages 3-6.", Category::Books, Condition::LikeNew, "Old Town"),
      (&owner, "Winter coats", "Two adult coats, size M and L.", Category::Clothing, Condition::Good, "Riverside"),
      (&neighbour, "Slow cooker", "Works fine, lid has a small chip.", Category::Kitchen, Condition::Fair, "Hillcrest"),
      (&neighbour, "Wooden train set", "Complete set with bridge and tunnel.", Category::Toys, Condition::Good, "Old Town"),
      (&owner, "Desk lamp", "LED, adjustable arm.", Category::Electronics, Condition::New, "Riverside"),
    ];

    for (i, (who, title, description, category, condition, location)) in samples.into_iter().enumerate() {
      let at = Utc::now() - ChronoDuration::hours(i as i64 * 7);
      backend.insert(Donation {
        id: DonationId(format!("demo-{}", i + 1)),
        owner_id: who.id.clone(),
        title: title.to_string(),
        description: description.to_string(),
        category,
        condition,
        location: location.to_string(),
        image_url: None,
        status: DonationStatus::Available,
        created_at: at,
        updated_at: at,
      });
    }
    backend
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Create an account without signing in.
  pub fn add_user(&self, email: &str, password: &str, display_name: Option<&str>) -> Identity {
    let mut state = self.lock();
    state.next_id += 1;
    let identity = Identity {
      id: format!("user-{}", state.next_id),
      email: email.to_string(),
      display_name: display_name.map(String::from),
    };
    state.accounts.push(Account {
      identity: identity.clone(),
      password: password.to_string(),
    });
    identity
  }

  /// Store a listing as-is.
  pub fn insert(&self, donation: Donation) {
    self.lock().donations.push(donation);
  }

  /// Make the next call of any kind fail with `error`.
  pub fn fail_next(&self, error: DataError) {
    self.lock().fail_next = Some(error);
  }

  /// How many times `op` (a gateway method name) was called.
  pub fn calls(&self, op: &str) -> usize {
    self.lock().calls.get(op).copied().unwrap_or(0)
  }

  pub fn session_handlers(&self) -> usize {
    self.bus.handler_count()
  }

  /// Count the call, apply latency and any injected failure.
  async fn enter(&self, op: &'static str) -> DataResult<()> {
    let injected = {
      let mut state = self.lock();
      *state.calls.entry(op).or_insert(0) += 1;
      state.fail_next.take()
    };
    if let Some(latency) = self.latency {
      tokio::time::sleep(latency).await;
    }
    match injected {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }

  fn require_user(state: &State) -> DataResult<Identity> {
    state
      .session
      .as_ref()
      .map(|s| s.user.clone())
      .ok_or_else(|| DataError::unauthorized("sign in to manage listings"))
  }

  fn issue_session(identity: Identity) -> Session {
    Session {
      access_token: format!("memory-access-{}", identity.id),
      refresh_token: format!("memory-refresh-{}", identity.id),
      expires_at: Utc::now() + ChronoDuration::hours(1),
      user: identity,
    }
  }
}

fn newest_first(mut donations: Vec<Donation>) -> Vec<Donation> {
  donations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
  donations
}

fn owned_mut<'a>(
  donations: &'a mut [Donation],
  id: &DonationId,
  user: &Identity,
) -> DataResult<&'a mut Donation> {
  let donation = donations
    .iter_mut()
    .find(|d| &d.id == id)
    .ok_or_else(|| DataError::not_found("donation", id.as_str()))?;
  if donation.owner_id != user.id {
    return Err(DataError::backend(403, "only the owner can change this listing"));
  }
  Ok(donation)
}

#[async_trait]
impl DonationGateway for MemoryBackend {
  async fn list_donations(&self, filters: &DonationFilters) -> DataResult<Vec<Donation>> {
    self.enter("list_donations").await?;
    let state = self.lock();
    Ok(newest_first(
      state
        .donations
        .iter()
        .filter(|d| filters.matches(d))
        .cloned()
        .collect(),
    ))
  }

  async fn get_donation(&self, id: &DonationId) -> DataResult<Donation> {
    self.enter("get_donation").await?;
    self
      .lock()
      .donations
      .iter()
      .find(|d| &d.id == id)
      .cloned()
      .ok_or_else(|| DataError::not_found("donation", id.as_str()))
  }

  async fn list_user_donations(&self, owner_id: &str) -> DataResult<Vec<Donation>> {
    self.enter("list_user_donations").await?;
    let state = self.lock();
    Ok(newest_first(
      state
        .donations
        .iter()
        .filter(|d| d.owner_id == owner_id)
        .cloned()
        .collect(),
    ))
  }

  async fn create_donation(&self, donation: &NewDonation) -> DataResult<Donation> {
    self.enter("create_donation").await?;
    if donation.title.trim().is_empty() {
      return Err(DataError::backend(400, "title is required"));
    }

    let mut state = self.lock();
    let user = Self::require_user(&state)?;
    state.next_id += 1;
    let now = Utc::now();
    let created = Donation {
      id: DonationId(format!("donation-{}", state.next_id)),
      owner_id: user.id,
      title: donation.title.trim().to_string(),
      description: donation.description.clone(),
      category: donation.category,
      condition: donation.condition,
      location: donation.location.clone(),
      image_url: donation.image_url.clone(),
      status: DonationStatus::Available,
      created_at: now,
      updated_at: now,
    };
    state.donations.push(created.clone());
    Ok(created)
  }

  async fn update_donation(&self, id: &DonationId, patch: &DonationPatch) -> DataResult<Donation> {
    self.enter("update_donation").await?;
    if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
      return Err(DataError::backend(400, "title is required"));
    }

    let mut state = self.lock();
    let user = Self::require_user(&state)?;
    let donation = owned_mut(&mut state.donations, id, &user)?;
    patch.apply_to(donation);
    donation.updated_at = Utc::now();
    Ok(donation.clone())
  }

  async fn delete_donation(&self, id: &DonationId) -> DataResult<()> {
    self.enter("delete_donation").await?;
    let mut state = self.lock();
    let user = Self::require_user(&state)?;
    owned_mut(&mut state.donations, id, &user)?;
    state.donations.retain(|d| &d.id != id);
    Ok(())
  }
}

#[async_trait]
impl AuthGateway for MemoryBackend {
  async fn sign_up(
    &self,
    email: &str,
    password: &str,
    display_name: Option<&str>,
  ) -> DataResult<Option<Session>> {
    self.enter("sign_up").await?;
    if password.len() < 6 {
      return Err(DataError::backend(422, "password should be at least 6 characters"));
    }
    let taken = self
      .lock()
      .accounts
      .iter()
      .any(|a| a.identity.email.eq_ignore_ascii_case(email));
    if taken {
      return Err(DataError::backend(422, "user already registered"));
    }

    let identity = self.add_user(email, password, display_name);
    let session = Self::issue_session(identity);
    self.lock().session = Some(session.clone());
    self.bus.emit(&SessionEvent::signed_in(session.clone()));
    Ok(Some(session))
  }

  async fn sign_in(&self, email: &str, password: &str) -> DataResult<Session> {
    self.enter("sign_in").await?;
    let session = {
      let mut state = self.lock();
      let identity = state
        .accounts
        .iter()
        .find(|a| a.identity.email.eq_ignore_ascii_case(email) && a.password == password)
        .map(|a| a.identity.clone())
        .ok_or_else(|| DataError::backend(400, "invalid login credentials"))?;
      let session = Self::issue_session(identity);
      state.session = Some(session.clone());
      session
    };
    self.bus.emit(&SessionEvent::signed_in(session.clone()));
    Ok(session)
  }

  async fn sign_out(&self) -> DataResult<()> {
    self.enter("sign_out").await?;
    self.lock().session = None;
    self.bus.emit(&SessionEvent::signed_out());
    Ok(())
  }

  async fn current_session(&self) -> DataResult<Option<Session>> {
    self.enter("current_session").await?;
    Ok(self.lock().session.clone())
  }

  fn on_session_change(&self, handler: SessionHandler) -> Subscription {
    self.bus.register(handler)
  }
}
