//! Integration tests for HttpBackend against a mocked REST backend.
//!
//! Covers request shape (headers, filters, bodies), status mapping, session
//! persistence and token refresh.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use sharecycle::error::DataError;
use sharecycle::gateway::http::HttpBackend;
use sharecycle::gateway::session_file::SessionFile;
use sharecycle::gateway::{AuthGateway, DonationGateway};
use sharecycle::model::{
  Category, Condition, DonationFilters, DonationId, DonationPatch, DonationStatus, Identity,
  NewDonation, Session,
};
use sharecycle::session::{SessionEvent, SessionEventKind, Subscription};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ANON_KEY: &str = "anon-key";

fn create_test_backend(mock_server: &MockServer) -> HttpBackend {
  HttpBackend::new(&mock_server.uri(), ANON_KEY, Duration::from_secs(5))
    .expect("failed to create backend")
}

fn donation_json(id: &str, owner: &str, title: &str) -> serde_json::Value {
  json!({
    "id": id,
    "owner_id": owner,
    "title": title,
    "description": "",
    "category": "books",
    "condition": "good",
    "location": "Lisbon",
    "image_url": null,
    "status": "available",
    "created_at": "2024-05-01T10:00:00Z",
    "updated_at": "2024-05-01T10:00:00Z"
  })
}

fn token_json(access_token: &str) -> serde_json::Value {
  json!({
    "access_token": access_token,
    "refresh_token": "refresh-1",
    "expires_in": 3600,
    "user": {
      "id": "user-1",
      "email": "ana@example.com",
      "user_metadata": { "display_name": "Ana" }
    }
  })
}

fn stored_session(expires_in: ChronoDuration) -> Session {
  Session {
    access_token: "old-token".to_string(),
    refresh_token: "old-refresh".to_string(),
    expires_at: Utc::now() + expires_in,
    user: Identity {
      id: "user-1".to_string(),
      email: "ana@example.com".to_string(),
      display_name: None,
    },
  }
}

fn record_events(backend: &HttpBackend) -> (Arc<Mutex<Vec<SessionEventKind>>>, Subscription) {
  let events = Arc::new(Mutex::new(Vec::new()));
  let subscription = backend.on_session_change(Arc::new({
    let events = Arc::clone(&events);
    move |event: &SessionEvent| events.lock().unwrap().push(event.kind)
  }));
  (events, subscription)
}

async fn mount_sign_in(mock_server: &MockServer) {
  Mock::given(method("POST"))
    .and(path("/auth/v1/token"))
    .and(query_param("grant_type", "password"))
    .and(body_partial_json(json!({ "email": "ana@example.com" })))
    .respond_with(ResponseTemplate::new(200).set_body_json(token_json("user-token")))
    .mount(mock_server)
    .await;
}

#[tokio::test]
async fn test_list_donations_sends_filters_and_anon_key() {
  let mock_server = MockServer::start().await;

  Mock::given(method("GET"))
    .and(path("/rest/v1/donations"))
    .and(query_param("select", "*"))
    .and(query_param("category", "eq.books"))
    .and(query_param("or", "(title.ilike.*atlas*,description.ilike.*atlas*)"))
    .and(query_param("order", "created_at.desc"))
    .and(header("apikey", ANON_KEY))
    .and(header("authorization", "Bearer anon-key"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!([
      donation_json("d-2", "user-2", "World atlas"),
      donation_json("d-1", "user-1", "Road atlas"),
    ])))
    .expect(1)
    .mount(&mock_server)
    .await;

  let backend = create_test_backend(&mock_server);
  let filters = DonationFilters {
    category: Some(Category::Books),
    search: Some("atlas".to_string()),
    ..Default::default()
  };
  let donations = backend.list_donations(&filters).await.expect("list failed");

  let ids: Vec<&str> = donations.iter().map(|d| d.id.as_str()).collect();
  assert_eq!(ids, vec!["d-2", "d-1"]);
}

#[tokio::test]
async fn test_get_donation_empty_result_is_not_found() {
  let mock_server = MockServer::start().await;

  Mock::given(method("GET"))
    .and(path("/rest/v1/donations"))
    .and(query_param("id", "eq.missing"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
    .mount(&mock_server)
    .await;

  let backend = create_test_backend(&mock_server);
  let err = backend
    .get_donation(&DonationId::from("missing"))
    .await
    .unwrap_err();

  assert_eq!(err, DataError::not_found("donation", "missing"));
}

#[tokio::test]
async fn test_list_user_donations_filters_by_owner() {
  let mock_server = MockServer::start().await;

  Mock::given(method("GET"))
    .and(path("/rest/v1/donations"))
    .and(query_param("owner_id", "eq.user-1"))
    .respond_with(
      ResponseTemplate::new(200).set_body_json(json!([donation_json("d-1", "user-1", "Lamp")])),
    )
    .mount(&mock_server)
    .await;

  let backend = create_test_backend(&mock_server);
  let donations = backend.list_user_donations("user-1").await.expect("list failed");

  assert_eq!(donations.len(), 1);
  assert_eq!(donations[0].owner_id, "user-1");
}

#[tokio::test]
async fn test_create_requires_session() {
  let mock_server = MockServer::start().await;

  Mock::given(method("POST"))
    .and(path("/rest/v1/donations"))
    .respond_with(ResponseTemplate::new(201))
    .expect(0)
    .mount(&mock_server)
    .await;

  let backend = create_test_backend(&mock_server);
  let err = backend
    .create_donation(&NewDonation {
      title: "Lamp".to_string(),
      description: String::new(),
      category: Category::Electronics,
      condition: Condition::Good,
      location: "Porto".to_string(),
      image_url: None,
    })
    .await
    .unwrap_err();

  assert!(matches!(err, DataError::Unauthorized { .. }));
}

#[tokio::test]
async fn test_sign_in_then_create_uses_access_token() {
  let mock_server = MockServer::start().await;
  let dir = tempfile::tempdir().unwrap();
  let session_file = SessionFile::new(dir.path().join("session.json"));

  mount_sign_in(&mock_server).await;
  Mock::given(method("POST"))
    .and(path("/rest/v1/donations"))
    .and(header("authorization", "Bearer user-token"))
    .and(header("prefer", "return=representation"))
    .and(body_partial_json(json!({
      "title": "Lamp",
      "owner_id": "user-1",
      "status": "available",
      "condition": "like_new"
    })))
    .respond_with(
      ResponseTemplate::new(201).set_body_json(json!([donation_json("d-9", "user-1", "Lamp")])),
    )
    .expect(1)
    .mount(&mock_server)
    .await;

  let backend = create_test_backend(&mock_server).with_session_file(session_file.clone());
  let (events, _subscription) = record_events(&backend);

  let session = backend
    .sign_in("ana@example.com", "secret")
    .await
    .expect("sign in failed");
  assert_eq!(session.user.display_name.as_deref(), Some("Ana"));
  assert_eq!(*events.lock().unwrap(), vec![SessionEventKind::SignedIn]);
  assert_eq!(
    session_file.load().map(|s| s.access_token),
    Some("user-token".to_string())
  );

  let created = backend
    .create_donation(&NewDonation {
      title: "Lamp".to_string(),
      description: String::new(),
      category: Category::Books,
      condition: Condition::LikeNew,
      location: "Lisbon".to_string(),
      image_url: None,
    })
    .await
    .expect("create failed");
  assert_eq!(created.id, DonationId::from("d-9"));
}

#[tokio::test]
async fn test_update_and_delete_missing_row_is_not_found() {
  let mock_server = MockServer::start().await;

  mount_sign_in(&mock_server).await;
  Mock::given(method("PATCH"))
    .and(path("/rest/v1/donations"))
    .and(query_param("id", "eq.gone"))
    .and(body_partial_json(json!({ "status": "reserved" })))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
    .mount(&mock_server)
    .await;
  Mock::given(method("DELETE"))
    .and(path("/rest/v1/donations"))
    .and(query_param("id", "eq.gone"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
    .mount(&mock_server)
    .await;

  let backend = create_test_backend(&mock_server);
  backend.sign_in("ana@example.com", "secret").await.unwrap();
  let id = DonationId::from("gone");

  let err = backend
    .update_donation(&id, &DonationPatch::status(DonationStatus::Reserved))
    .await
    .unwrap_err();
  assert_eq!(err, DataError::not_found("donation", "gone"));

  let err = backend.delete_donation(&id).await.unwrap_err();
  assert_eq!(err, DataError::not_found("donation", "gone"));
}

#[tokio::test]
async fn test_status_mapping() {
  let mock_server = MockServer::start().await;

  Mock::given(method("GET"))
    .and(path("/rest/v1/donations"))
    .and(query_param("id", "eq.locked"))
    .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "JWT expired" })))
    .mount(&mock_server)
    .await;
  Mock::given(method("GET"))
    .and(path("/rest/v1/donations"))
    .and(query_param("id", "eq.broken"))
    .respond_with(
      ResponseTemplate::new(500).set_body_json(json!({ "message": "relation does not exist" })),
    )
    .mount(&mock_server)
    .await;
  Mock::given(method("GET"))
    .and(path("/rest/v1/donations"))
    .and(query_param("id", "eq.garbled"))
    .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
    .mount(&mock_server)
    .await;

  let backend = create_test_backend(&mock_server);

  let err = backend.get_donation(&DonationId::from("locked")).await.unwrap_err();
  assert_eq!(err, DataError::unauthorized("JWT expired"));

  let err = backend.get_donation(&DonationId::from("broken")).await.unwrap_err();
  assert_eq!(err, DataError::backend(500, "relation does not exist"));

  let err = backend.get_donation(&DonationId::from("garbled")).await.unwrap_err();
  assert!(matches!(err, DataError::Decode { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
  // Bind then release a port so nothing is listening on it
  let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
  let port = listener.local_addr().unwrap().port();
  drop(listener);

  let backend =
    HttpBackend::new(&format!("http://127.0.0.1:{}", port), ANON_KEY, Duration::from_secs(2)).unwrap();
  let err = backend
    .list_donations(&DonationFilters::default())
    .await
    .unwrap_err();

  assert!(err.is_network(), "got {:?}", err);
}

#[tokio::test]
async fn test_invalid_credentials() {
  let mock_server = MockServer::start().await;

  Mock::given(method("POST"))
    .and(path("/auth/v1/token"))
    .respond_with(ResponseTemplate::new(400).set_body_json(json!({
      "error": "invalid_grant",
      "error_description": "Invalid login credentials"
    })))
    .mount(&mock_server)
    .await;

  let backend = create_test_backend(&mock_server);
  let err = backend.sign_in("ana@example.com", "wrong").await.unwrap_err();

  assert_eq!(err, DataError::backend(400, "Invalid login credentials"));
  assert_eq!(backend.current_session().await.unwrap(), None);
}

#[tokio::test]
async fn test_sign_up_pending_confirmation() {
  let mock_server = MockServer::start().await;

  Mock::given(method("POST"))
    .and(path("/auth/v1/signup"))
    .and(body_partial_json(json!({
      "email": "new@example.com",
      "data": { "display_name": "Newcomer" }
    })))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "id": "user-7",
      "email": "new@example.com"
    })))
    .mount(&mock_server)
    .await;

  let backend = create_test_backend(&mock_server);
  let (events, _subscription) = record_events(&backend);
  let session = backend
    .sign_up("new@example.com", "secret", Some("Newcomer"))
    .await
    .expect("sign up failed");

  assert_eq!(session, None);
  assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_sign_up_with_session_signs_in() {
  let mock_server = MockServer::start().await;

  Mock::given(method("POST"))
    .and(path("/auth/v1/signup"))
    .respond_with(ResponseTemplate::new(200).set_body_json(token_json("fresh-token")))
    .mount(&mock_server)
    .await;

  let backend = create_test_backend(&mock_server);
  let (events, _subscription) = record_events(&backend);
  let session = backend
    .sign_up("ana@example.com", "secret", None)
    .await
    .expect("sign up failed")
    .expect("expected a session");

  assert_eq!(session.access_token, "fresh-token");
  assert_eq!(*events.lock().unwrap(), vec![SessionEventKind::SignedIn]);
}

#[tokio::test]
async fn test_expired_session_is_refreshed() {
  let mock_server = MockServer::start().await;
  let dir = tempfile::tempdir().unwrap();
  let session_file = SessionFile::new(dir.path().join("session.json"));
  session_file
    .save(&stored_session(ChronoDuration::seconds(-60)))
    .unwrap();

  Mock::given(method("POST"))
    .and(path("/auth/v1/token"))
    .and(query_param("grant_type", "refresh_token"))
    .and(body_partial_json(json!({ "refresh_token": "old-refresh" })))
    .respond_with(ResponseTemplate::new(200).set_body_json(token_json("new-token")))
    .expect(1)
    .mount(&mock_server)
    .await;

  let backend = create_test_backend(&mock_server).with_session_file(session_file.clone());
  let (events, _subscription) = record_events(&backend);

  let session = backend.current_session().await.unwrap().expect("expected a session");
  assert_eq!(session.access_token, "new-token");
  assert_eq!(*events.lock().unwrap(), vec![SessionEventKind::TokenRefreshed]);
  assert_eq!(
    session_file.load().map(|s| s.access_token),
    Some("new-token".to_string())
  );

  // Refreshed session is reused without another round trip
  let again = backend.current_session().await.unwrap();
  assert_eq!(again.map(|s| s.access_token), Some("new-token".to_string()));
}

#[tokio::test]
async fn test_write_with_expired_session_refreshes_first() {
  let mock_server = MockServer::start().await;
  let dir = tempfile::tempdir().unwrap();
  let session_file = SessionFile::new(dir.path().join("session.json"));
  session_file
    .save(&stored_session(ChronoDuration::seconds(-60)))
    .unwrap();

  Mock::given(method("POST"))
    .and(path("/auth/v1/token"))
    .and(query_param("grant_type", "refresh_token"))
    .and(header("authorization", "Bearer anon-key"))
    .and(body_partial_json(json!({ "refresh_token": "old-refresh" })))
    .respond_with(ResponseTemplate::new(200).set_body_json(token_json("new-token")))
    .expect(1)
    .mount(&mock_server)
    .await;
  Mock::given(method("POST"))
    .and(path("/rest/v1/donations"))
    .and(header("authorization", "Bearer new-token"))
    .respond_with(
      ResponseTemplate::new(201).set_body_json(json!([donation_json("d-3", "user-1", "Desk")])),
    )
    .expect(1)
    .mount(&mock_server)
    .await;
  Mock::given(method("GET"))
    .and(path("/rest/v1/donations"))
    .and(header("authorization", "Bearer new-token"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!([donation_json("d-3", "user-1", "Desk")])))
    .expect(1)
    .mount(&mock_server)
    .await;

  let backend = create_test_backend(&mock_server).with_session_file(session_file.clone());
  let (events, _subscription) = record_events(&backend);

  let created = backend
    .create_donation(&NewDonation {
      title: "Desk".to_string(),
      description: String::new(),
      category: Category::Furniture,
      condition: Condition::Fair,
      location: "Braga".to_string(),
      image_url: None,
    })
    .await
    .expect("create failed");
  assert_eq!(created.id, DonationId::from("d-3"));
  assert_eq!(*events.lock().unwrap(), vec![SessionEventKind::TokenRefreshed]);

  // Reads reuse the refreshed token
  let mine = backend.list_user_donations("user-1").await.expect("list failed");
  assert_eq!(mine.len(), 1);
  assert_eq!(
    session_file.load().map(|s| s.access_token),
    Some("new-token".to_string())
  );
}

#[tokio::test]
async fn test_rejected_refresh_signs_out() {
  let mock_server = MockServer::start().await;
  let dir = tempfile::tempdir().unwrap();
  let session_file = SessionFile::new(dir.path().join("session.json"));
  session_file
    .save(&stored_session(ChronoDuration::seconds(-60)))
    .unwrap();

  Mock::given(method("POST"))
    .and(path("/auth/v1/token"))
    .and(query_param("grant_type", "refresh_token"))
    .respond_with(ResponseTemplate::new(400).set_body_json(json!({
      "error_description": "Invalid Refresh Token"
    })))
    .mount(&mock_server)
    .await;

  let backend = create_test_backend(&mock_server).with_session_file(session_file.clone());
  let (events, _subscription) = record_events(&backend);

  assert_eq!(backend.current_session().await.unwrap(), None);
  assert_eq!(*events.lock().unwrap(), vec![SessionEventKind::SignedOut]);
  assert!(session_file.load().is_none());
}

#[tokio::test]
async fn test_sign_out_clears_session_even_if_token_rejected() {
  let mock_server = MockServer::start().await;
  let dir = tempfile::tempdir().unwrap();
  let session_file = SessionFile::new(dir.path().join("session.json"));
  session_file
    .save(&stored_session(ChronoDuration::hours(1)))
    .unwrap();

  Mock::given(method("POST"))
    .and(path("/auth/v1/logout"))
    .and(header("authorization", "Bearer old-token"))
    .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "invalid JWT" })))
    .expect(1)
    .mount(&mock_server)
    .await;

  let backend = create_test_backend(&mock_server).with_session_file(session_file.clone());
  let (events, _subscription) = record_events(&backend);

  backend.sign_out().await.expect("sign out failed");

  assert_eq!(*events.lock().unwrap(), vec![SessionEventKind::SignedOut]);
  assert_eq!(backend.current_session().await.unwrap(), None);
  assert!(session_file.load().is_none());
}
