use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::manifest::Manifest;
use crate::worker::CacheIdentity;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Site origin every manifest path resolves against, e.g. "https://example.com"
  pub origin: String,
  pub cache: CacheConfig,
  /// Resource paths to pre-cache, in order
  pub manifest: Vec<String>,
  /// Per-request timeout for network fetches, in seconds
  #[serde(default = "default_fetch_timeout_secs")]
  pub fetch_timeout_secs: u64,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Cache name, shared across generations (e.g. "mills-shirley")
  pub name: String,
  /// Version string; bumping it is the sole invalidation lever
  pub version: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Cache database path (default: user data dir, precache/cache.db)
  pub path: Option<PathBuf>,
}

fn default_fetch_timeout_secs() -> u64 {
  30
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./precache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/precache/config.yaml
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
        "No configuration file found. Create one at ~/.config/precache/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("precache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("precache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Parsed origin URL.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }

  /// Cache identity for the configured deployment.
  pub fn identity(&self) -> CacheIdentity {
    CacheIdentity::new(self.cache.name.clone(), self.cache.version.clone())
  }

  /// Validated pre-cache manifest.
  pub fn manifest(&self) -> Result<Manifest> {
    Manifest::from_paths(self.manifest.clone())
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_secs(self.fetch_timeout_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const EXAMPLE: &str = r#"
origin: https://example.com
cache:
  name: mills-shirley
  version: 1.0.0
manifest:
  - /
  - /assets/css/styles.css
  - /assets/js/performance.js
"#;

  #[test]
  fn parses_minimal_config() {
    let config: Config = serde_yaml::from_str(EXAMPLE).unwrap();

    assert_eq!(config.identity().store_name(), "mills-shirley-v1.0.0");
    assert_eq!(config.manifest().unwrap().len(), 3);
    assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
    assert!(config.storage.path.is_none());
  }

  #[test]
  fn parses_overrides() {
    let yaml = format!(
      "{}fetch_timeout_secs: 5\nstorage:\n  path: /tmp/cache.db\n",
      EXAMPLE
    );
    let config: Config = serde_yaml::from_str(&yaml).unwrap();

    assert_eq!(config.fetch_timeout(), Duration::from_secs(5));
    assert_eq!(config.storage.path, Some(PathBuf::from("/tmp/cache.db")));
  }

  #[test]
  fn rejects_bad_origin() {
    let mut config: Config = serde_yaml::from_str(EXAMPLE).unwrap();
    config.origin = "not a url".to_string();
    assert!(config.origin_url().is_err());
  }
}
