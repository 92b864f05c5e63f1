//! Hierarchical query keys.

use std::collections::BTreeMap;
use std::fmt;

/// One token of a [`QueryKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
  /// A fixed segment such as `donations` or `list`
  Name(String),
  /// An entity identifier
  Id(String),
  /// A parameter map, e.g. list filters. Sorted so equal maps hash equally.
  Params(BTreeMap<String, String>),
}

impl fmt::Display for KeyPart {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Name(name) => f.write_str(name),
      Self::Id(id) => write!(f, "#{}", id),
      Self::Params(params) => {
        f.write_str("{")?;
        for (i, (k, v)) in params.iter().enumerate() {
          if i > 0 {
            f.write_str(",")?;
          }
          write!(f, "{}={}", k, v)?;
        }
        f.write_str("}")
      }
    }
  }
}

/// Ordered sequence of tokens identifying a cached value.
///
/// Keys form a prefix hierarchy: `donations` is a prefix of
/// `donations.list.{category=books}`. The empty key is a prefix of every key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<KeyPart>);

impl QueryKey {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start a key with a single name segment.
  pub fn root(name: impl Into<String>) -> Self {
    Self::new().name(name)
  }

  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.0.push(KeyPart::Name(name.into()));
    self
  }

  pub fn id(mut self, id: impl Into<String>) -> Self {
    self.0.push(KeyPart::Id(id.into()));
    self
  }

  pub fn params<I, K, V>(mut self, params: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    let map = params
      .into_iter()
      .map(|(k, v)| (k.into(), v.into()))
      .collect();
    self.0.push(KeyPart::Params(map));
    self
  }

  pub fn parts(&self) -> &[KeyPart] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Whether `prefix` is this key or one of its ancestors.
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.0.starts_with(&prefix.0)
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.0.is_empty() {
      return f.write_str("<root>");
    }
    for (i, part) in self.0.iter().enumerate() {
      if i > 0 {
        f.write_str(".")?;
      }
      write!(f, "{}", part)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_prefix_matching() {
    let list = QueryKey::root("donations")
      .name("list")
      .params([("category", "books")]);

    assert!(list.starts_with(&QueryKey::root("donations")));
    assert!(list.starts_with(&QueryKey::root("donations").name("list")));
    assert!(list.starts_with(&list));
    assert!(list.starts_with(&QueryKey::new()));
    assert!(!list.starts_with(&QueryKey::root("donations").name("detail")));
    assert!(!QueryKey::root("donations").starts_with(&list));
  }

  #[test]
  fn test_params_are_order_independent() {
    let a = QueryKey::root("x").params([("a", "1"), ("b", "2")]);
    let b = QueryKey::root("x").params([("b", "2"), ("a", "1")]);
    assert_eq!(a, b);
  }

  #[test]
  fn test_name_and_id_tokens_differ() {
    assert_ne!(QueryKey::root("x").name("1"), QueryKey::root("x").id("1"));
  }

  #[test]
  fn test_display() {
    let key = QueryKey::root("donations")
      .name("list")
      .params([("status", "available"), ("category", "books")]);
    assert_eq!(
      key.to_string(),
      "donations.list.{category=books,status=available}"
    );
    assert_eq!(QueryKey::root("donations").id("d-1").to_string(), "donations.#d-1");
    assert_eq!(QueryKey::new().to_string(), "<root>");
  }
}
