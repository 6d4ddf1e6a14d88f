//! Core types shared by the cache storage and the manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Normalized identity of a request: upper-cased method plus absolute URL
/// without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  identity: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &url::Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      identity: format!("{} {}", method.to_ascii_uppercase(), url),
    }
  }

  /// Human-readable identity, e.g. `GET https://example.com/index.html`.
  pub fn identity(&self) -> &str {
    &self.identity
  }

  /// SHA256 hash of the identity for stable, fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.identity.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.identity)
  }
}

/// A response as it is kept in a cache store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
  /// URL the response was fetched from
  pub url: String,
  pub status: u16,
  /// Header pairs in the order the server sent them
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl StoredResponse {
  /// Whether the status is in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(key, _)| key.eq_ignore_ascii_case(name))
      .map(|(_, value)| value.as_str())
  }
}

/// A single cached response.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: StoredResponse,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Result of resolving a request, including where the response came from.
#[derive(Debug, Clone)]
pub struct Resolved {
  /// The response handed back to the page
  pub response: StoredResponse,
  /// Where the response came from
  pub source: ResponseSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Resolved {
  /// Fresh data from the network.
  pub fn from_network(response: StoredResponse) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  /// Data served from the active store.
  pub fn from_cache(entry: CachedEntry) -> Self {
    Self {
      response: entry.response,
      source: ResponseSource::Cache,
      cached_at: Some(entry.cached_at),
    }
  }

  /// Network failed, serving the cached copy instead.
  pub fn offline(entry: CachedEntry) -> Self {
    Self {
      response: entry.response,
      source: ResponseSource::Offline,
      cached_at: Some(entry.cached_at),
    }
  }

  /// Request never touched the store.
  pub fn bypass(response: StoredResponse) -> Self {
    Self {
      response,
      source: ResponseSource::Bypass,
      cached_at: None,
    }
  }
}

/// Indicates where a resolved response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Served from the active store
  Cache,
  /// Network unavailable, serving cached data
  Offline,
  /// Excluded or non-GET request, passed straight to the network
  Bypass,
}

impl fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "cache (offline)",
      Self::Bypass => "network (bypass)",
    };
    f.write_str(name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  #[test]
  fn test_key_drops_fragment_and_uppercases_method() {
    let url = Url::parse("https://example.com/index.html#top").unwrap();
    let key = RequestKey::new("get", &url);
    assert_eq!(key.identity(), "GET https://example.com/index.html");
  }

  #[test]
  fn test_key_keeps_query() {
    let a = Url::parse("https://example.com/a.mp3?v=1").unwrap();
    let b = Url::parse("https://example.com/a.mp3?v=2").unwrap();
    assert_ne!(
      RequestKey::new("GET", &a).cache_hash(),
      RequestKey::new("GET", &b).cache_hash()
    );
  }

  #[test]
  fn test_hash_is_hex_sha256() {
    let url = Url::parse("https://example.com/").unwrap();
    let hash = RequestKey::new("GET", &url).cache_hash();
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let response = StoredResponse {
      url: "https://example.com/".to_string(),
      status: 200,
      headers: vec![("Content-Type".to_string(), "audio/mpeg".to_string())],
      body: Vec::new(),
    };
    assert_eq!(response.header("content-type"), Some("audio/mpeg"));
    assert!(response.is_ok());
  }
}
