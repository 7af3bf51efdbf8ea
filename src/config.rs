use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cache::{AppDefaults, Expiry, PolicyToken, DEFAULT_QUOTA_BYTES};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub app: AppConfig,
  pub storage: StorageConfig,
  pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  /// Application name; namespaces every cache key
  pub name: String,
  /// Cache every successful read unless told otherwise
  pub auto_cache: bool,
  /// Default expiration in minutes, or "never"
  pub cache_expire: Expiry,
  /// "local", or the name of a response header carrying max-age
  pub cache_policy: Option<PolicyToken>,
  /// Data seeded into the cache at startup, keyed by resource
  pub prefetched: BTreeMap<String, Value>,
  /// Expiration for prefetched data; defaults to `cache_expire`
  pub prefetched_expire: Option<Expiry>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      name: "localcache".to_string(),
      auto_cache: false,
      cache_expire: Expiry::default(),
      cache_policy: None,
      prefetched: BTreeMap::new(),
      prefetched_expire: None,
    }
  }
}

impl AppConfig {
  pub fn defaults(&self) -> AppDefaults {
    AppDefaults {
      auto_cache: self.auto_cache,
      cache_expire: self.cache_expire,
      cache_policy: self.cache_policy.clone(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Database file; defaults to the platform data directory
  pub path: Option<PathBuf>,
  /// Durable tier quota in bytes
  pub quota_bytes: usize,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      path: None,
      quota_bytes: DEFAULT_QUOTA_BYTES,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
  pub base_url: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./localcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/localcache/config.yaml
  ///
  /// Without an explicit path, a missing file means defaults.
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
    // Check current directory
    let local = PathBuf::from("localcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("localcache").join("config.yaml");
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

  pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }
}
