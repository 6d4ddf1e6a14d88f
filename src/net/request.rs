use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::cache::RequestKey;

/// A resource request intercepted from the hosting page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
  pub method: String,
  pub url: Url,
}

impl AssetRequest {
  pub fn new(method: &str, url: Url) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new("GET", url)
  }

  /// Parse `raw` as a URL, resolving relative references against `base`.
  pub fn parse(method: &str, raw: &str, base: &Url) -> Result<Self> {
    let url = base
      .join(raw)
      .map_err(|e| eyre!("Invalid asset URL '{}': {}", raw, e))?;
    Ok(Self::new(method, url))
  }

  pub fn is_get(&self) -> bool {
    self.method == "GET"
  }

  /// Only http(s) requests are eligible for caching.
  pub fn is_http(&self) -> bool {
    matches!(self.url.scheme(), "http" | "https")
  }

  pub fn same_origin(&self, base: &Url) -> bool {
    self.url.origin() == base.origin()
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}
