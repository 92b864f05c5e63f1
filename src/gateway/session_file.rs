//! Persisted session, so a login survives restarts.

use std::path::{Path, PathBuf};
use tracing::warn;

use crate::model::Session;

/// JSON file holding the current session.
#[derive(Debug, Clone)]
pub struct SessionFile {
  path: PathBuf,
}

impl SessionFile {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// `$XDG_DATA_HOME/sharecycle/session.json` or the platform equivalent.
  pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .map(|dir| dir.join("sharecycle").join("session.json"))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// The stored session; a missing or unreadable file means no session.
  pub fn load(&self) -> Option<Session> {
    let contents = match std::fs::read_to_string(&self.path) {
      Ok(contents) => contents,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
      Err(e) => {
        warn!(path = %self.path.display(), error = %e, "failed to read session file");
        return None;
      }
    };
    serde_json::from_str(&contents)
      .map_err(|e| warn!(path = %self.path.display(), error = %e, "ignoring corrupt session file"))
      .ok()
  }

  pub fn save(&self, session: &Session) -> std::io::Result<()> {
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(session)?;
    std::fs::write(&self.path, json)?;
    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
  }

  pub fn clear(&self) -> std::io::Result<()> {
    match std::fs::remove_file(&self.path) {
      Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
      _ => Ok(()),
    }
  }
}
