//! Remote data gateway: the backend-as-a-service seen from the client.
//!
//! The cache and hooks only talk to these traits. [`http::HttpBackend`] speaks
//! the backend's REST surface; [`memory::MemoryBackend`] keeps everything in
//! process for tests and the offline demo.

mod api_types;
pub mod http;
pub mod memory;
pub mod session_file;

use async_trait::async_trait;

use crate::error::DataResult;
use crate::model::{Donation, DonationFilters, DonationId, DonationPatch, NewDonation, Session};
use crate::session::{SessionHandler, Subscription};

/// CRUD operations on donation listings.
#[async_trait]
pub trait DonationGateway: Send + Sync {
  /// Listings matching `filters`, newest first.
  async fn list_donations(&self, filters: &DonationFilters) -> DataResult<Vec<Donation>>;

  /// A single listing; `NotFound` when the id is unknown.
  async fn get_donation(&self, id: &DonationId) -> DataResult<Donation>;

  /// Listings owned by `owner_id`, newest first.
  async fn list_user_donations(&self, owner_id: &str) -> DataResult<Vec<Donation>>;

  /// List a new item as the signed-in user.
  async fn create_donation(&self, donation: &NewDonation) -> DataResult<Donation>;

  async fn update_donation(&self, id: &DonationId, patch: &DonationPatch) -> DataResult<Donation>;

  async fn delete_donation(&self, id: &DonationId) -> DataResult<()>;
}

/// Account and session operations.
#[async_trait]
pub trait AuthGateway: Send + Sync {
  /// Register an account. Returns `None` when the backend requires email
  /// confirmation before issuing a session.
  async fn sign_up(
    &self,
    email: &str,
    password: &str,
    display_name: Option<&str>,
  ) -> DataResult<Option<Session>>;

  async fn sign_in(&self, email: &str, password: &str) -> DataResult<Session>;

  async fn sign_out(&self) -> DataResult<()>;

  /// The session currently held by the client, if any.
  async fn current_session(&self) -> DataResult<Option<Session>>;

  /// Register for pushed session changes.
  fn on_session_change(&self, handler: SessionHandler) -> Subscription;
}

/// Everything the application needs from the backend.
pub trait Backend: DonationGateway + AuthGateway {}

impl<T: DonationGateway + AuthGateway + ?Sized> Backend for T {}
