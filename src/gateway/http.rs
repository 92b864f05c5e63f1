//! REST client for the hosted backend.
//!
//! Donations live behind a PostgREST-style table API (`rest/v1/donations`),
//! accounts behind a GoTrue-style auth API (`auth/v1/*`). Every request
//! carries the project's anon key; requests made while signed in carry the
//! session's access token instead of the anon key as bearer. An expired
//! access token is refreshed before it is sent.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::api_types::{
  ApiCredentials, ApiDonationInsert, ApiErrorBody, ApiRefresh, ApiSignUp, ApiSignUpData,
  ApiTokenResponse,
};
use super::session_file::SessionFile;
use super::{AuthGateway, DonationGateway};
use crate::error::{DataError, DataResult};
use crate::model::{
  Donation, DonationFilters, DonationId, DonationPatch, DonationStatus, NewDonation, Session,
};
use crate::session::{SessionBus, SessionEvent, SessionEventKind, SessionHandler, Subscription};

const USER_AGENT_VALUE: &str = concat!("sharecycle/", env!("CARGO_PKG_VERSION"));
const DONATIONS_PATH: &str = "rest/v1/donations";

/// Backend client speaking the hosted REST API.
pub struct HttpBackend {
  client: reqwest::Client,
  base_url: Url,
  anon_key: String,
  session: Mutex<Option<Session>>,
  /// Serializes refreshes; a refresh token is only good for one exchange
  refresh_lock: tokio::sync::Mutex<()>,
  session_file: Option<SessionFile>,
  bus: SessionBus,
}

impl HttpBackend {
  pub fn new(base_url: &str, anon_key: impl Into<String>, timeout: Duration) -> DataResult<Self> {
    let mut base_url = Url::parse(base_url)
      .map_err(|e| DataError::network(format!("invalid backend url '{}': {}", base_url, e)))?;
    // Url::join replaces the last segment unless the path ends in '/'
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let mut default_headers = HeaderMap::new();
    default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .default_headers(default_headers)
      .build()
      .map_err(|e| DataError::network(format!("failed to create HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url,
      anon_key: anon_key.into(),
      session: Mutex::new(None),
      refresh_lock: tokio::sync::Mutex::new(()),
      session_file: None,
      bus: SessionBus::new(),
    })
  }

  /// Restore the session from `file` and keep it updated from now on.
  pub fn with_session_file(mut self, file: SessionFile) -> Self {
    let restored = file.load();
    if let Some(session) = &restored {
      debug!(user = %session.user.id, "restored session");
    }
    *self.lock_session() = restored;
    self.session_file = Some(file);
    self
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
    self.session.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn stored_session(&self) -> Option<Session> {
    self.lock_session().clone()
  }

  /// Stored session, refreshed first if its access token expired.
  ///
  /// A refresh the backend rejects signs the user out and yields `None`;
  /// a network failure is returned and the session kept.
  async fn valid_session(&self) -> DataResult<Option<Session>> {
    match self.stored_session() {
      Some(session) if session.is_expired() => {}
      other => return Ok(other),
    }

    let _refreshing = self.refresh_lock.lock().await;
    // Another request may have refreshed while we waited
    let Some(session) = self.stored_session() else {
      return Ok(None);
    };
    if !session.is_expired() {
      return Ok(Some(session));
    }

    debug!(user = %session.user.id, "session expired, refreshing");
    let refresh = ApiRefresh {
      refresh_token: &session.refresh_token,
    };
    match self.token_request("refresh_token", &refresh).await {
      Ok(refreshed) => {
        self.set_session(Some(refreshed.clone()), SessionEventKind::TokenRefreshed);
        Ok(Some(refreshed))
      }
      Err(e) if e.is_network() => Err(e),
      Err(e) => {
        warn!(error = %e, "session refresh rejected, signing out");
        self.set_session(None, SessionEventKind::SignedOut);
        Ok(None)
      }
    }
  }

  async fn require_session(&self) -> DataResult<Session> {
    self
      .valid_session()
      .await?
      .ok_or_else(|| DataError::unauthorized("sign in to manage listings"))
  }

  /// Replace the held session, persist it and notify subscribers.
  fn set_session(&self, session: Option<Session>, kind: SessionEventKind) {
    *self.lock_session() = session.clone();

    if let Some(file) = &self.session_file {
      let persisted = match &session {
        Some(s) => file.save(s),
        None => file.clear(),
      };
      if let Err(e) = persisted {
        warn!(path = %file.path().display(), error = %e, "failed to persist session");
      }
    }

    self.bus.emit(&SessionEvent { kind, session });
  }

  fn endpoint(&self, path: &str) -> DataResult<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| DataError::network(format!("invalid endpoint '{}': {}", path, e)))
  }

  fn donations_url(&self) -> DataResult<Url> {
    let mut url = self.endpoint(DONATIONS_PATH)?;
    url.query_pairs_mut().append_pair("select", "*");
    Ok(url)
  }

  /// Request bearing `access_token`, or the anon key without one.
  fn request(&self, method: Method, url: Url, access_token: Option<&str>) -> RequestBuilder {
    self
      .client
      .request(method, url)
      .header("apikey", &self.anon_key)
      .bearer_auth(access_token.unwrap_or(&self.anon_key))
  }

  /// Request as the current user if signed in, anonymous otherwise.
  async fn read_request(&self, url: Url) -> DataResult<RequestBuilder> {
    let session = self.valid_session().await?;
    Ok(self.request(Method::GET, url, session.as_ref().map(|s| s.access_token.as_str())))
  }

  /// Send `request` and map non-success statuses to [`DataError`].
  async fn send(&self, request: RequestBuilder) -> DataResult<Response> {
    let response = request
      .send()
      .await
      .map_err(|e| DataError::network(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let path = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    let message = ApiErrorBody::message_from(&body).unwrap_or_else(|| {
      status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
    });
    debug!(status = status.as_u16(), path = %path, message = %message, "backend rejected request");

    Err(match status {
      StatusCode::UNAUTHORIZED => DataError::unauthorized(message),
      StatusCode::NOT_FOUND => DataError::not_found("resource", path),
      _ => DataError::backend(status.as_u16(), message),
    })
  }

  async fn read_json<T: DeserializeOwned>(response: Response) -> DataResult<T> {
    let bytes = response
      .bytes()
      .await
      .map_err(|e| DataError::network(format!("failed to read response body: {}", e)))?;
    serde_json::from_slice(&bytes).map_err(|e| DataError::decode(e.to_string()))
  }

  /// Single row of a `return=representation` write, `NotFound` if none.
  fn single_row(rows: Vec<Donation>, id: &DonationId) -> DataResult<Donation> {
    rows
      .into_iter()
      .next()
      .ok_or_else(|| DataError::not_found("donation", id.as_str()))
  }

  async fn token_request(&self, grant_type: &str, body: &impl serde::Serialize) -> DataResult<Session> {
    let mut url = self.endpoint("auth/v1/token")?;
    url.query_pairs_mut().append_pair("grant_type", grant_type);
    let response = self
      .send(self.request(Method::POST, url, None).json(body))
      .await?;
    let token: ApiTokenResponse = Self::read_json(response).await?;
    Ok(token.into_session())
  }
}

/// PostgREST `ilike` pattern; characters that break the filter grammar are dropped.
fn ilike_pattern(text: &str) -> String {
  let cleaned: String = text
    .chars()
    .filter(|c| !matches!(c, ',' | '(' | ')' | '*' | '%'))
    .collect();
  format!("*{}*", cleaned.trim())
}

fn apply_filters(url: &mut Url, filters: &DonationFilters) {
  let mut query = url.query_pairs_mut();
  if let Some(category) = filters.category {
    query.append_pair("category", &format!("eq.{}", category));
  }
  if let Some(status) = filters.status {
    query.append_pair("status", &format!("eq.{}", status));
  }
  if let Some(location) = filters.location.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
    query.append_pair("location", &format!("ilike.{}", ilike_pattern(location)));
  }
  if let Some(search) = filters.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
    let pattern = ilike_pattern(search);
    query.append_pair(
      "or",
      &format!("(title.ilike.{},description.ilike.{})", pattern, pattern),
    );
  }
  query.append_pair("order", "created_at.desc");
}

#[async_trait]
impl DonationGateway for HttpBackend {
  async fn list_donations(&self, filters: &DonationFilters) -> DataResult<Vec<Donation>> {
    let mut url = self.donations_url()?;
    apply_filters(&mut url, filters);
    debug!(url = %url, "listing donations");
    let response = self.send(self.read_request(url).await?).await?;
    Self::read_json(response).await
  }

  async fn get_donation(&self, id: &DonationId) -> DataResult<Donation> {
    let mut url = self.donations_url()?;
    url
      .query_pairs_mut()
      .append_pair("id", &format!("eq.{}", id));
    debug!(id = %id, "fetching donation");
    let response = self.send(self.read_request(url).await?).await?;
    let rows: Vec<Donation> = Self::read_json(response).await?;
    Self::single_row(rows, id)
  }

  async fn list_user_donations(&self, owner_id: &str) -> DataResult<Vec<Donation>> {
    let mut url = self.donations_url()?;
    url
      .query_pairs_mut()
      .append_pair("owner_id", &format!("eq.{}", owner_id))
      .append_pair("order", "created_at.desc");
    debug!(owner = %owner_id, "listing user donations");
    let response = self.send(self.read_request(url).await?).await?;
    Self::read_json(response).await
  }

  async fn create_donation(&self, donation: &NewDonation) -> DataResult<Donation> {
    let session = self.require_session().await?;
    let body = ApiDonationInsert {
      donation,
      owner_id: &session.user.id,
      status: DonationStatus::Available,
    };
    let url = self.donations_url()?;
    let response = self
      .send(
        self
          .request(Method::POST, url, Some(&session.access_token))
          .header("Prefer", "return=representation")
          .json(&body),
      )
      .await?;
    let rows: Vec<Donation> = Self::read_json(response).await?;
    let created = rows
      .into_iter()
      .next()
      .ok_or_else(|| DataError::decode("backend returned no row for the new listing"))?;
    info!(id = %created.id, "donation created");
    Ok(created)
  }

  async fn update_donation(&self, id: &DonationId, patch: &DonationPatch) -> DataResult<Donation> {
    let session = self.require_session().await?;
    let mut url = self.donations_url()?;
    url
      .query_pairs_mut()
      .append_pair("id", &format!("eq.{}", id));
    let response = self
      .send(
        self
          .request(Method::PATCH, url, Some(&session.access_token))
          .header("Prefer", "return=representation")
          .json(patch),
      )
      .await?;
    let rows: Vec<Donation> = Self::read_json(response).await?;
    let updated = Self::single_row(rows, id)?;
    info!(id = %id, "donation updated");
    Ok(updated)
  }

  async fn delete_donation(&self, id: &DonationId) -> DataResult<()> {
    let session = self.require_session().await?;
    let mut url = self.donations_url()?;
    url
      .query_pairs_mut()
      .append_pair("id", &format!("eq.{}", id));
    let response = self
      .send(
        self
          .request(Method::DELETE, url, Some(&session.access_token))
          .header("Prefer", "return=representation"),
      )
      .await?;
    let rows: Vec<Donation> = Self::read_json(response).await?;
    Self::single_row(rows, id)?;
    info!(id = %id, "donation deleted");
    Ok(())
  }
}

#[async_trait]
impl AuthGateway for HttpBackend {
  async fn sign_up(
    &self,
    email: &str,
    password: &str,
    display_name: Option<&str>,
  ) -> DataResult<Option<Session>> {
    let url = self.endpoint("auth/v1/signup")?;
    let body = ApiSignUp {
      email,
      password,
      data: ApiSignUpData { display_name },
    };
    let response = self.send(self.request(Method::POST, url, None).json(&body)).await?;
    let value: serde_json::Value = Self::read_json(response).await?;

    // Without auto-confirm the backend returns the bare user, no tokens
    if value.get("access_token").is_none() {
      info!(email = %email, "account created, confirmation pending");
      return Ok(None);
    }
    let token: ApiTokenResponse =
      serde_json::from_value(value).map_err(|e| DataError::decode(e.to_string()))?;
    let session = token.into_session();
    info!(user = %session.user.id, "account created and signed in");
    self.set_session(Some(session.clone()), SessionEventKind::SignedIn);
    Ok(Some(session))
  }

  async fn sign_in(&self, email: &str, password: &str) -> DataResult<Session> {
    let session = self
      .token_request("password", &ApiCredentials { email, password })
      .await?;
    info!(user = %session.user.id, "signed in");
    self.set_session(Some(session.clone()), SessionEventKind::SignedIn);
    Ok(session)
  }

  async fn sign_out(&self) -> DataResult<()> {
    let remote = match self.stored_session() {
      Some(session) => {
        let url = self.endpoint("auth/v1/logout")?;
        self
          .send(self.request(Method::POST, url, Some(&session.access_token)))
          .await
          .map(|_| ())
      }
      None => Ok(()),
    };
    // The local session is dropped even if the backend could not be told
    self.set_session(None, SessionEventKind::SignedOut);
    info!("signed out");

    match remote {
      Err(DataError::Unauthorized { .. }) => Ok(()),
      other => other,
    }
  }

  async fn current_session(&self) -> DataResult<Option<Session>> {
    self.valid_session().await
  }

  fn on_session_change(&self, handler: SessionHandler) -> Subscription {
    self.bus.register(handler)
  }
}
