use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the hosted backend (e.g. "https://abc.example.co")
  pub url: String,
  /// Owner of every document this client reads or writes
  pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// How long a cached collection stays valid
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_secs: default_ttl_secs(),
    }
  }
}

impl CacheConfig {
  fn checked_ttl(&self) -> Option<chrono::Duration> {
    i64::try_from(self.ttl_secs)
      .ok()
      .and_then(chrono::Duration::try_seconds)
  }

  pub fn ttl(&self) -> chrono::Duration {
    // Out-of-range values are rejected by `Config::parse`
    self
      .checked_ttl()
      .unwrap_or_else(|| chrono::Duration::seconds(default_ttl_secs() as i64))
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Interval between background refreshes of a mounted view
  #[serde(default = "default_poll_interval_secs")]
  pub poll_interval_secs: u64,
  /// Storage key written by any session that mutates documents
  #[serde(default = "default_storage_key")]
  pub storage_key: String,
  /// Number of documents shown by dashboard previews
  #[serde(default = "default_dashboard_limit")]
  pub dashboard_limit: usize,
  /// How often the shared storage file is checked for writes from other sessions
  #[serde(default = "default_storage_poll_ms")]
  pub storage_poll_ms: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      poll_interval_secs: default_poll_interval_secs(),
      storage_key: default_storage_key(),
      dashboard_limit: default_dashboard_limit(),
      storage_poll_ms: default_storage_poll_ms(),
    }
  }
}

impl SyncConfig {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.poll_interval_secs)
  }

  pub fn storage_poll(&self) -> Duration {
    Duration::from_millis(self.storage_poll_ms)
  }
}

fn default_ttl_secs() -> u64 {
  15 * 60
}

fn default_poll_interval_secs() -> u64 {
  5
}

fn default_storage_key() -> String {
  "document_updated".to_string()
}

fn default_dashboard_limit() -> usize {
  3
}

fn default_storage_poll_ms() -> u64 {
  500
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./petdocs.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/petdocs/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/petdocs/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("petdocs.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("petdocs").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.sync.dashboard_limit == 0 {
      return Err(eyre!("sync.dashboard_limit must be at least 1"));
    }
    if config.sync.poll_interval_secs == 0 {
      return Err(eyre!("sync.poll_interval_secs must be at least 1"));
    }
    if config.sync.storage_poll_ms == 0 {
      return Err(eyre!("sync.storage_poll_ms must be at least 1"));
    }
    if config.cache.checked_ttl().is_none() {
      return Err(eyre!(
        "cache.ttl_secs is out of range: {}",
        config.cache.ttl_secs
      ));
    }
    Ok(config)
  }

  /// Get the backend API key from environment variables.
  pub fn get_api_key() -> Result<String> {
    std::env::var("PETDOCS_API_KEY")
      .map_err(|_| eyre!("API key not found. Set the PETDOCS_API_KEY environment variable."))
  }

  /// Get the session access token, if one was provided.
  ///
  /// Falls back to the API key when PETDOCS_ACCESS_TOKEN is unset.
  pub fn get_access_token() -> Option<String> {
    std::env::var("PETDOCS_ACCESS_TOKEN").ok()
  }
}

/// Directory for local state (logs, shared storage file).
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("petdocs"))
}
