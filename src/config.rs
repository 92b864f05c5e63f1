use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::donations::StalePolicy;

const CONFIG_FILE_NAME: &str = "sharecycle.yaml";
const URL_ENV: &str = "SHARECYCLE_URL";
const ANON_KEY_ENV: &str = "SHARECYCLE_ANON_KEY";
const PASSWORD_ENV: &str = "SHARECYCLE_PASSWORD";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub backend: BackendConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Custom title for header (defaults to the backend host if not set)
  pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  /// Hosted REST backend
  #[default]
  Http,
  /// In-process demo data, nothing leaves the machine
  Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  #[serde(default)]
  pub kind: BackendKind,
  /// Project URL, e.g. https://abc.supabase.co
  pub url: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for BackendConfig {
  fn default() -> Self {
    Self {
      kind: BackendKind::default(),
      url: None,
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  15
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Seconds a browse or "my listings" result stays fresh
  #[serde(default = "default_list_stale_secs")]
  pub list_stale_secs: u64,
  /// Seconds a single listing stays fresh
  #[serde(default = "default_detail_stale_secs")]
  pub detail_stale_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      list_stale_secs: default_list_stale_secs(),
      detail_stale_secs: default_detail_stale_secs(),
    }
  }
}

fn default_list_stale_secs() -> u64 {
  60
}

fn default_detail_stale_secs() -> u64 {
  300
}

impl CacheConfig {
  pub fn stale_policy(&self) -> StalePolicy {
    StalePolicy {
      list: Duration::from_secs(self.list_stale_secs),
      detail: Duration::from_secs(self.detail_stale_secs),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./sharecycle.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/sharecycle/config.yaml
  ///
  /// Without a file, defaults are used as long as SHARECYCLE_URL is set.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      let cwd = std::env::current_dir().unwrap_or_default();
      find_config_file(&cwd, dirs::config_dir().as_deref())
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None if std::env::var_os(URL_ENV).is_some() => Ok(Self::default()),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/sharecycle/config.yaml\n\
                 or set {} to the backend URL. See config.example.yaml for the format.",
        URL_ENV
      )),
    }
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty file is a valid all-defaults config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Backend URL from the config file, else from SHARECYCLE_URL.
  pub fn backend_url(&self) -> Result<String> {
    self
      .backend
      .url
      .clone()
      .or_else(|| std::env::var(URL_ENV).ok())
      .filter(|url| !url.trim().is_empty())
      .ok_or_else(|| eyre!("Backend URL not set. Add backend.url to the config or set {}.", URL_ENV))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.backend.timeout_secs)
  }

  /// Get the backend's public API key from the environment.
  ///
  /// Checks SHARECYCLE_ANON_KEY.
  pub fn get_anon_key() -> Result<String> {
    std::env::var(ANON_KEY_ENV)
      .map_err(|_| eyre!("Backend API key not found. Set {} environment variable.", ANON_KEY_ENV))
  }

  /// Get the account password from the environment.
  ///
  /// Checks SHARECYCLE_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var(PASSWORD_ENV)
      .map_err(|_| eyre!("Password not found. Set {} or pass --password.", PASSWORD_ENV))
  }

  /// Directory for the session file and logs.
  pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .map(|dir| dir.join("sharecycle"))
  }
}

fn find_config_file(cwd: &Path, config_dir: Option<&Path>) -> Option<PathBuf> {
  // Check current directory
  let local = cwd.join(CONFIG_FILE_NAME);
  if local.exists() {
    return Some(local);
  }

  // Check XDG config directory
  if let Some(config_dir) = config_dir {
    let xdg_path = config_dir.join("sharecycle").join("config.yaml");
    if xdg_path.exists() {
      return Some(xdg_path);
    }
  }

  None
}
