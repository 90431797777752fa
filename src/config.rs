use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::ServicePattern;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin that root-relative manifest entries and request targets resolve against
  pub origin: String,
  pub cache: CacheConfig,
  /// Resources pre-populated into the static partition at install time.
  /// Absolute URLs list third-party bundles (CDN scripts, styles).
  pub manifest: Vec<String>,
  /// Remote-service patterns served network-first
  #[serde(with = "serde_yaml::with::singleton_map_recursive")]
  pub services: Vec<ServicePattern>,
  pub lifecycle: LifecycleConfig,
  pub notifications: NotificationConfig,
  pub sync: SyncConfig,
  pub network: NetworkConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080/".to_string(),
      cache: CacheConfig::default(),
      manifest: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
        "/icons/icon-192.png".to_string(),
        "/icons/icon-512.png".to_string(),
      ],
      services: vec![
        ServicePattern::HostSuffix("googleapis.com".to_string()),
        ServicePattern::HostSuffix("firebaseio.com".to_string()),
      ],
      lifecycle: LifecycleConfig::default(),
      notifications: NotificationConfig::default(),
      sync: SyncConfig::default(),
      network: NetworkConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Prefix shared by every partition name of this application
  pub prefix: String,
  /// Deployment generation; changing it retires all older partitions on activation
  pub version: String,
  /// Document served when a navigation can be answered neither by cache nor network
  pub shell: String,
  /// Database location (default: $XDG_DATA_HOME/shellcache/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "shellcache".to_string(),
      version: "v1.0.0".to_string(),
      shell: "/index.html".to_string(),
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
  /// Take over open clients as soon as install succeeds
  pub skip_waiting: bool,
}

impl Default for LifecycleConfig {
  fn default() -> Self {
    Self { skip_waiting: true }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  /// Body used when a push arrives without a payload
  pub fallback_body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub open_title: String,
  pub close_title: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "shellcache".to_string(),
      fallback_body: "New notification".to_string(),
      icon: "/icons/icon-192.png".to_string(),
      badge: "/icons/icon-192.png".to_string(),
      vibrate: vec![200, 100, 200],
      open_title: "Open app".to_string(),
      close_title: "Close".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Background-sync tags this worker answers to
  pub tags: Vec<String>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tags: vec!["sync-downtimes".to_string()],
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Overall request timeout; unset leaves it to the platform
  pub timeout_secs: Option<u64>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  ///
  /// Falls back to defaults when nothing is found.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Resolve an absolute or root-relative identifier against the origin.
  pub fn resolve(&self, target: &str) -> Result<Url> {
    let origin =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;
    origin
      .join(target)
      .map_err(|e| eyre!("Invalid resource identifier '{}': {}", target, e))
  }

  pub fn manifest_urls(&self) -> Result<Vec<Url>> {
    self.manifest.iter().map(|entry| self.resolve(entry)).collect()
  }

  pub fn shell_url(&self) -> Result<Url> {
    self.resolve(&self.cache.shell)
  }

  /// Directory holding the database and log file.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shellcache"))
  }

  pub fn db_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(path) => Ok(path.clone()),
      None => Ok(Self::data_dir()?.join("cache.db")),
    }
  }
}
