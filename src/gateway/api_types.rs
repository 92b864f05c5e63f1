//! Serde types matching the backend's REST request and response bodies.
//!
//! These types are separate from domain types so the wire format can change
//! without touching the model.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{DonationStatus, Identity, NewDonation, Session};

// ============================================================================
// Auth requests
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiCredentials<'a> {
  pub email: &'a str,
  pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ApiSignUpData<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub display_name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct ApiSignUp<'a> {
  pub email: &'a str,
  pub password: &'a str,
  pub data: ApiSignUpData<'a>,
}

#[derive(Debug, Serialize)]
pub struct ApiRefresh<'a> {
  pub refresh_token: &'a str,
}

// ============================================================================
// Auth responses
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ApiUserMetadata {
  pub display_name: Option<String>,
  pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiUser {
  pub id: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub user_metadata: ApiUserMetadata,
}

#[derive(Debug, Deserialize)]
pub struct ApiTokenResponse {
  pub access_token: String,
  pub refresh_token: String,
  /// Lifetime in seconds
  pub expires_in: Option<i64>,
  /// Expiry as unix seconds
  pub expires_at: Option<i64>,
  pub user: ApiUser,
}

/// Error body. Different backend components use different field names.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
  pub message: Option<String>,
  pub msg: Option<String>,
  pub error_description: Option<String>,
  pub error: Option<String>,
}

impl ApiErrorBody {
  /// Best human-readable message in `body`, if it is a JSON error object.
  pub fn message_from(body: &str) -> Option<String> {
    let parsed: ApiErrorBody = serde_json::from_str(body).ok()?;
    parsed
      .message
      .or(parsed.msg)
      .or(parsed.error_description)
      .or(parsed.error)
      .filter(|m| !m.trim().is_empty())
  }
}

// ============================================================================
// Donation requests
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiDonationInsert<'a> {
  #[serde(flatten)]
  pub donation: &'a NewDonation,
  pub owner_id: &'a str,
  pub status: DonationStatus,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl From<ApiUser> for Identity {
  fn from(user: ApiUser) -> Self {
    let meta = user.user_metadata;
    Identity {
      id: user.id,
      email: user.email.unwrap_or_default(),
      display_name: meta.display_name.or(meta.full_name),
    }
  }
}

impl ApiTokenResponse {
  pub fn into_session(self) -> Session {
    let expires_at = self
      .expires_at
      .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
      .unwrap_or_else(|| expiry_from_lifetime(self.expires_in));
    Session {
      access_token: self.access_token,
      refresh_token: self.refresh_token,
      expires_at,
      user: self.user.into(),
    }
  }
}

fn expiry_from_lifetime(expires_in: Option<i64>) -> DateTime<Utc> {
  Utc::now() + Duration::seconds(expires_in.unwrap_or(3600))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Category, Condition};

  #[test]
  fn test_error_message_field_precedence() {
    assert_eq!(
      ApiErrorBody::message_from(r#"{"message":"new row violates row-level security policy"}"#),
      Some("new row violates row-level security policy".to_string())
    );
    assert_eq!(
      ApiErrorBody::message_from(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
      Some("Invalid login credentials".to_string())
    );
    assert_eq!(ApiErrorBody::message_from("<html>oops</html>"), None);
    assert_eq!(ApiErrorBody::message_from(r#"{"msg":""}"#), None);
  }

  #[test]
  fn test_token_response_into_session() {
    let json = serde_json::json!({
      "access_token": "a",
      "refresh_token": "r",
      "expires_in": 3600,
      "expires_at": 1_900_000_000,
      "user": {
        "id": "u-1",
        "email": "ana@example.com",
        "user_metadata": { "display_name": "Ana" }
      }
    });
    let session = serde_json::from_value::<ApiTokenResponse>(json)
      .unwrap()
      .into_session();
    assert_eq!(session.expires_at.timestamp(), 1_900_000_000);
    assert_eq!(session.user.display_name.as_deref(), Some("Ana"));
    assert_eq!(session.user.email, "ana@example.com");
  }

  #[test]
  fn test_insert_body_is_flat() {
    let donation = NewDonation {
      title: "Lamp".to_string(),
      description: "Bright".to_string(),
      category: Category::Electronics,
      condition: Condition::LikeNew,
      location: "Here".to_string(),
      image_url: None,
    };
    let body = serde_json::to_value(ApiDonationInsert {
      donation: &donation,
      owner_id: "u-1",
      status: DonationStatus::Available,
    })
    .unwrap();
    assert_eq!(body["title"], "Lamp");
    assert_eq!(body["condition"], "like_new");
    assert_eq!(body["owner_id"], "u-1");
    assert_eq!(body["status"], "available");
    assert!(body.get("image_url").is_none());
  }
}
