use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration, loaded once at startup and immutable thereafter.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin and base path that relative manifest URLs resolve against
  pub base_url: String,
  /// Version tag of this deployment (e.g. "v13")
  pub version: String,
  /// Store names are `<cache_prefix><version>`
  #[serde(default = "default_cache_prefix")]
  pub cache_prefix: String,
  /// Assets required for the page to render and work offline
  #[serde(default)]
  pub shell: Vec<String>,
  /// Bulk media cached only on explicit request
  #[serde(default)]
  pub content: Vec<String>,
  #[serde(default)]
  pub strategy: Strategy,
  #[serde(default)]
  pub population: PopulationMode,
  #[serde(default)]
  pub runtime_caching: RuntimeCaching,
  /// Take over from a waiting version as soon as install succeeds
  #[serde(default = "default_skip_waiting")]
  pub skip_waiting: bool,
  #[serde(default)]
  pub exclude: ExcludeConfig,
  /// Per-request network timeout; unset means no timeout
  pub fetch_timeout_secs: Option<u64>,
  /// SQLite database path (defaults to the user data directory)
  pub database: Option<PathBuf>,
  /// Directory for daily-rolling log files
  pub log_dir: Option<PathBuf>,
}

fn default_cache_prefix() -> String {
  "asset-cache-".to_string()
}

fn default_skip_waiting() -> bool {
  true
}

/// How an intercepted GET request is answered.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
  /// Serve the cached match, only fetching on a miss
  #[default]
  CacheFirst,
  /// Serve the cached match and refresh it in the background
  StaleWhileRevalidate,
  /// Prefer the network, fall back to the cache on failure
  NetworkFirst,
}

/// How a population phase reacts to individual fetch failures.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PopulationMode {
  /// Any failure aborts the phase and nothing is written
  Atomic,
  /// Failures are logged and skipped
  #[default]
  BestEffort,
}

/// Which network responses fetched on a miss are written to the store.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeCaching {
  Off,
  #[default]
  SameOrigin,
  Any,
}

/// Requests that always go straight to the network.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExcludeConfig {
  /// Origins such as "https://www.gstatic.com"
  #[serde(default)]
  pub origins: Vec<String>,
  /// Path prefixes such as "/__cast/"
  #[serde(default)]
  pub path_prefixes: Vec<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./asset-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/asset-cache/config.yaml
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
        "No configuration file found. Create one at ~/.config/asset-cache/config.yaml\n\
                 See asset-cache.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("asset-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("asset-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;

    if config.version.trim().is_empty() {
      return Err(eyre!("`version` must not be empty"));
    }

    Ok(config)
  }

  /// Name of the store owned by this version.
  pub fn store_name(&self) -> String {
    format!("{}{}", self.cache_prefix, self.version)
  }

  pub fn fetch_timeout(&self) -> Option<Duration> {
    self.fetch_timeout_secs.map(Duration::from_secs)
  }

  /// Get the cache database path, falling back to the user data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("asset-cache").join("cache.db"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("base_url: https://site.example/\nversion: v13\n").unwrap();

    assert_eq!(config.store_name(), "asset-cache-v13");
    assert_eq!(config.strategy, Strategy::CacheFirst);
    assert_eq!(config.population, PopulationMode::BestEffort);
    assert_eq!(config.runtime_caching, RuntimeCaching::SameOrigin);
    assert!(config.skip_waiting);
    assert!(config.fetch_timeout().is_none());
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
base_url: https://site.example/
version: v19
cache_prefix: rhh-cache-
shell: [index.html, cover.jpg]
content: [01-track.mp3]
strategy: stale-while-revalidate
population: atomic
runtime_caching: "off"
skip_waiting: false
exclude:
  origins: ["https://www.gstatic.com"]
  path_prefixes: ["/__cast/"]
fetch_timeout_secs: 30
database: /tmp/cache.db
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.store_name(), "rhh-cache-v19");
    assert_eq!(config.shell, vec!["index.html", "cover.jpg"]);
    assert_eq!(config.strategy, Strategy::StaleWhileRevalidate);
    assert_eq!(config.population, PopulationMode::Atomic);
    assert_eq!(config.runtime_caching, RuntimeCaching::Off);
    assert!(!config.skip_waiting);
    assert_eq!(config.exclude.path_prefixes, vec!["/__cast/"]);
    assert_eq!(config.fetch_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(
      config.database_path().unwrap(),
      PathBuf::from("/tmp/cache.db")
    );
  }

  #[test]
  fn test_unknown_strategy_rejected() {
    let result = Config::from_yaml("base_url: x\nversion: v1\nstrategy: cache-only\n");
    assert!(result.is_err());
  }

  #[test]
  fn test_empty_version_rejected() {
    let result = Config::from_yaml("base_url: https://site.example/\nversion: ' '\n");
    assert!(result.is_err());
  }

  #[test]
  fn test_load_missing_explicit_path() {
    let result = Config::load(Some(Path::new("/nonexistent/asset-cache.yaml")));
    assert!(result.is_err());
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "base_url: https://site.example/\nversion: v2\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.version, "v2");
  }
}
