//! Error types shared by the cache, hooks and gateways.

/// Failure of a remote read or write.
///
/// Errors are cloned into every de-duplicated waiter of a fetch, so all
/// variants carry owned strings instead of source errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataError {
  /// The backend could not be reached.
  #[error("network error: {message}")]
  Network { message: String },

  /// The backend answered with a domain error (validation, policy, ...).
  #[error("backend error ({status}): {message}")]
  Backend { status: u16, message: String },

  /// The requested entity does not exist.
  #[error("{entity} not found: {id}")]
  NotFound { entity: &'static str, id: String },

  /// No session, or the backend rejected the session.
  #[error("unauthorized: {message}")]
  Unauthorized { message: String },

  /// The backend answered with a body we could not decode.
  #[error("invalid response: {message}")]
  Decode { message: String },
}

pub type DataResult<T> = Result<T, DataError>;

impl DataError {
  pub fn network(message: impl Into<String>) -> Self {
    Self::Network {
      message: message.into(),
    }
  }

  pub fn backend(status: u16, message: impl Into<String>) -> Self {
    Self::Backend {
      status,
      message: message.into(),
    }
  }

  pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
    Self::NotFound {
      entity,
      id: id.into(),
    }
  }

  pub fn unauthorized(message: impl Into<String>) -> Self {
    Self::Unauthorized {
      message: message.into(),
    }
  }

  pub fn decode(message: impl Into<String>) -> Self {
    Self::Decode {
      message: message.into(),
    }
  }

  /// Whether the error came from the transport rather than the backend.
  pub fn is_network(&self) -> bool {
    matches!(self, Self::Network { .. })
  }

  /// Exit code for the CLI.
  pub fn exit_code(&self) -> i32 {
    match self {
      Self::NotFound { .. } => 1,
      Self::Unauthorized { .. } => 2,
      Self::Backend { .. } => 3,
      Self::Network { .. } => 4,
      Self::Decode { .. } => 5,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_display_messages() {
    assert_eq!(
      DataError::not_found("donation", "d-1").to_string(),
      "donation not found: d-1"
    );
    assert_eq!(
      DataError::backend(400, "title is required").to_string(),
      "backend error (400): title is required"
    );
  }

  #[test]
  fn test_exit_codes_are_distinct() {
    let errors = [
      DataError::not_found("donation", "x"),
      DataError::unauthorized("x"),
      DataError::backend(500, "x"),
      DataError::network("x"),
      DataError::decode("x"),
    ];
    let mut codes: Vec<i32> = errors.iter().map(DataError::exit_code).collect();
    codes.sort_unstable();
    codes.dedup();
    assert_eq!(codes.len(), errors.len());
  }
}
