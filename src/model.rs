//! Domain types exchanged with the backend.
//!
//! The cache never looks inside these; they are passed through as values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Opaque donation identifier assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DonationId(pub String);

impl DonationId {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for DonationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for DonationId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

/// Generates the label/parse/cycle helpers shared by the small enums below.
macro_rules! labelled_enum {
  ($name:ident, $what:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
    impl $name {
      pub const ALL: &'static [$name] = &[$($name::$variant),+];

      pub fn as_str(&self) -> &'static str {
        match self {
          $($name::$variant => $label),+
        }
      }

      /// Next variant in declaration order, wrapping around.
      pub fn next(&self) -> Self {
        let idx = Self::ALL.iter().position(|v| v == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
      }
    }

    impl FromStr for $name {
      type Err = String;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL
          .iter()
          .copied()
          .find(|v| v.as_str() == wanted)
          .ok_or_else(|| {
            let valid: Vec<&str> = Self::ALL.iter().map(|v| v.as_str()).collect();
            format!("unknown {} '{}', expected one of: {}", $what, s, valid.join(", "))
          })
      }
    }
  };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
  Clothing,
  Furniture,
  Electronics,
  Books,
  Toys,
  Kitchen,
  Other,
}

labelled_enum!(Category, "category", {
  Clothing => "clothing",
  Furniture => "furniture",
  Electronics => "electronics",
  Books => "books",
  Toys => "toys",
  Kitchen => "kitchen",
  Other => "other",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
  New,
  LikeNew,
  Good,
  Fair,
}

labelled_enum!(Condition, "condition", {
  New => "new",
  LikeNew => "like_new",
  Good => "good",
  Fair => "fair",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
  #[default]
  Available,
  Reserved,
  Donated,
}

labelled_enum!(DonationStatus, "status", {
  Available => "available",
  Reserved => "reserved",
  Donated => "donated",
});

/// An item listed for donation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
  pub id: DonationId,
  pub owner_id: String,
  pub title: String,
  #[serde(default)]
  pub description: String,
  pub category: Category,
  pub condition: Condition,
  #[serde(default)]
  pub location: String,
  #[serde(default)]
  pub image_url: Option<String>,
  #[serde(default)]
  pub status: DonationStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Fields supplied when listing a new item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDonation {
  pub title: String,
  pub description: String,
  pub category: Category,
  pub condition: Condition,
  pub location: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image_url: Option<String>,
}

/// Partial update of a listing; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DonationPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category: Option<Category>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub condition: Option<Condition>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub location: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image_url: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<DonationStatus>,
}

impl DonationPatch {
  pub fn status(status: DonationStatus) -> Self {
    Self {
      status: Some(status),
      ..Self::default()
    }
  }

  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }

  /// Apply the set fields to `donation`.
  pub fn apply_to(&self, donation: &mut Donation) {
    if let Some(title) = &self.title {
      donation.title = title.clone();
    }
    if let Some(description) = &self.description {
      donation.description = description.clone();
    }
    if let Some(category) = self.category {
      donation.category = category;
    }
    if let Some(condition) = self.condition {
      donation.condition = condition;
    }
    if let Some(location) = &self.location {
      donation.location = location.clone();
    }
    if let Some(image_url) = &self.image_url {
      donation.image_url = Some(image_url.clone());
    }
    if let Some(status) = self.status {
      donation.status = status;
    }
  }
}

/// Browse filters. Empty filters list everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DonationFilters {
  pub category: Option<Category>,
  pub status: Option<DonationStatus>,
  /// Case-insensitive substring of title or description
  pub search: Option<String>,
  /// Case-insensitive substring of location
  pub location: Option<String>,
}

impl DonationFilters {
  pub fn is_empty(&self) -> bool {
    self.params().is_empty()
  }

  /// Set filters as sorted name/value pairs. Blank text filters are dropped.
  pub fn params(&self) -> BTreeMap<&'static str, String> {
    let mut params = BTreeMap::new();
    if let Some(category) = self.category {
      params.insert("category", category.to_string());
    }
    if let Some(status) = self.status {
      params.insert("status", status.to_string());
    }
    if let Some(search) = non_blank(self.search.as_deref()) {
      params.insert("search", search.to_lowercase());
    }
    if let Some(location) = non_blank(self.location.as_deref()) {
      params.insert("location", location.to_lowercase());
    }
    params
  }

  pub fn matches(&self, donation: &Donation) -> bool {
    if self.category.is_some_and(|c| c != donation.category) {
      return false;
    }
    if self.status.is_some_and(|s| s != donation.status) {
      return false;
    }
    if let Some(search) = non_blank(self.search.as_deref()) {
      let needle = search.to_lowercase();
      if !donation.title.to_lowercase().contains(&needle)
        && !donation.description.to_lowercase().contains(&needle)
      {
        return false;
      }
    }
    if let Some(location) = non_blank(self.location.as_deref()) {
      if !donation
        .location
        .to_lowercase()
        .contains(&location.to_lowercase())
      {
        return false;
      }
    }
    true
  }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
  s.map(str::trim).filter(|s| !s.is_empty())
}

/// The signed-in user as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
  pub id: String,
  pub email: String,
  #[serde(default)]
  pub display_name: Option<String>,
}

impl Identity {
  /// Display name, falling back to the email address.
  pub fn label(&self) -> &str {
    self.display_name.as_deref().unwrap_or(&self.email)
  }
}

/// An authenticated session issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
  pub access_token: String,
  pub refresh_token: String,
  pub expires_at: DateTime<Utc>,
  pub user: Identity,
}

impl Session {
  pub fn is_expired(&self) -> bool {
    self.expires_at <= Utc::now()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn donation() -> Donation {
    Donation {
      id: DonationId::from("d-1"),
      owner_id: "u-1".to_string(),
      title: "Oak bookshelf".to_string(),
      description: "Five shelves, some scratches".to_string(),
      category: Category::Furniture,
      condition: Condition::Good,
      location: "West Lafayette".to_string(),
      image_url: None,
      status: DonationStatus::Available,
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  #[test]
  fn test_enum_parse_and_display() {
    assert_eq!("Like New".parse::<Condition>(), Ok(Condition::LikeNew));
    assert_eq!("like-new".parse::<Condition>(), Ok(Condition::LikeNew));
    assert_eq!(Category::Books.to_string(), "books");
    assert!("furnitures".parse::<Category>().is_err());
  }

  #[test]
  fn test_enum_next_wraps() {
    assert_eq!(DonationStatus::Available.next(), DonationStatus::Reserved);
    assert_eq!(DonationStatus::Donated.next(), DonationStatus::Available);
  }

  #[test]
  fn test_filters_match() {
    let d = donation();
    assert!(DonationFilters::default().matches(&d));

    let by_text = DonationFilters {
      search: Some("SHELVES".to_string()),
      ..Default::default()
    };
    assert!(by_text.matches(&d));

    let by_category = DonationFilters {
      category: Some(Category::Books),
      ..Default::default()
    };
    assert!(!by_category.matches(&d));

    let by_location = DonationFilters {
      location: Some("lafayette".to_string()),
      status: Some(DonationStatus::Available),
      ..Default::default()
    };
    assert!(by_location.matches(&d));
  }

  #[test]
  fn test_blank_filters_are_ignored() {
    let filters = DonationFilters {
      search: Some("   ".to_string()),
      ..Default::default()
    };
    assert!(filters.is_empty());
    assert!(filters.matches(&donation()));
  }

  #[test]
  fn test_patch_apply() {
    let mut d = donation();
    let patch = DonationPatch {
      title: Some("Pine bookshelf".to_string()),
      status: Some(DonationStatus::Reserved),
      ..Default::default()
    };
    patch.apply_to(&mut d);
    assert_eq!(d.title, "Pine bookshelf");
    assert_eq!(d.status, DonationStatus::Reserved);
    assert_eq!(d.category, Category::Furniture);
    assert!(DonationPatch::default().is_empty());
  }

  #[test]
  fn test_donation_json_shape() {
    let json = serde_json::json!({
      "id": "d-7",
      "owner_id": "u-1",
      "title": "Kettle",
      "category": "kitchen",
      "condition": "like_new",
      "created_at": "2024-05-01T10:00:00Z",
      "updated_at": "2024-05-01T10:00:00Z"
    });
    let d: Donation = serde_json::from_value(json).unwrap();
    assert_eq!(d.id, DonationId::from("d-7"));
    assert_eq!(d.status, DonationStatus::Available);
    assert_eq!(d.condition, Condition::LikeNew);
    assert_eq!(d.description, "");
  }
}
