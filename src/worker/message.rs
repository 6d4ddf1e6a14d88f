use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;

/// Signals posted by the hosting page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum HostMessage {
  /// Begin background caching of the content list
  #[serde(rename = "CACHE_MUSIC", alias = "CACHE_CONTENT")]
  CacheContent,
  /// Let a waiting version take over now
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
  #[serde(other)]
  Unknown,
}

impl HostMessage {
  pub fn from_json(raw: &str) -> Result<Self> {
    serde_json::from_str(raw).map_err(|e| eyre!("Invalid host message '{}': {}", raw, e))
  }
}
