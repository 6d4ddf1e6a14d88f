//! Resolved, immutable view of the configuration used by the manager.

use color_eyre::{eyre::eyre, Result};
use tracing::warn;
use url::{Origin, Url};

use crate::cache::StoredResponse;
use crate::config::{Config, PopulationMode, RuntimeCaching, Strategy};
use crate::net::AssetRequest;

#[derive(Debug, Clone)]
pub struct Settings {
  pub store_name: String,
  pub version: String,
  pub base_url: Url,
  pub shell: Vec<AssetRequest>,
  pub content: Vec<AssetRequest>,
  pub strategy: Strategy,
  pub population: PopulationMode,
  pub runtime_caching: RuntimeCaching,
  pub skip_waiting: bool,
  pub exclusions: Exclusions,
}

impl Settings {
  pub fn from_config(config: &Config) -> Result<Self> {
    let mut base_url = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid base_url '{}': {}", config.base_url, e))?;
    // Relative manifest entries live under the base path, not beside it
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let exclusions = Exclusions::new(&config.exclude.origins, &config.exclude.path_prefixes)?;

    // Excluded assets are always fetched live, so they never enter a store
    let manifest = |list: &[String]| -> Result<Vec<AssetRequest>> {
      let mut requests = Vec::with_capacity(list.len());
      for raw in list {
        let request = AssetRequest::parse("GET", raw, &base_url)?;
        if exclusions.matches(&request.url) {
          warn!(url = %request.url, "Excluded asset listed in manifest, skipping");
          continue;
        }
        requests.push(request);
      }
      Ok(requests)
    };
    let shell = manifest(&config.shell)?;
    let content = manifest(&config.content)?;

    Ok(Self {
      store_name: config.store_name(),
      version: config.version.clone(),
      base_url,
      shell,
      content,
      strategy: config.strategy,
      population: config.population,
      runtime_caching: config.runtime_caching,
      skip_waiting: config.skip_waiting,
      exclusions,
    })
  }

  /// Whether a response fetched on a cache miss should be written to the store.
  pub fn should_store(&self, request: &AssetRequest, response: &StoredResponse) -> bool {
    if !response.is_ok() {
      return false;
    }
    match self.runtime_caching {
      RuntimeCaching::Off => false,
      RuntimeCaching::SameOrigin => request.same_origin(&self.base_url),
      RuntimeCaching::Any => true,
    }
  }
}

/// Requests that must never be served from or written to the store.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
  origins: Vec<Origin>,
  path_prefixes: Vec<String>,
}

impl Exclusions {
  pub fn new(origins: &[String], path_prefixes: &[String]) -> Result<Self> {
    let origins = origins
      .iter()
      .map(|raw| {
        let url = Url::parse(raw).map_err(|e| eyre!("Invalid excluded origin '{}': {}", raw, e))?;
        match url.origin() {
          origin @ Origin::Tuple(..) => Ok(origin),
          Origin::Opaque(_) => Err(eyre!("Excluded origin '{}' has no host", raw)),
        }
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      origins,
      path_prefixes: path_prefixes.to_vec(),
    })
  }

  pub fn matches(&self, url: &Url) -> bool {
    let origin = url.origin();
    self.origins.iter().any(|o| *o == origin)
      || self
        .path_prefixes
        .iter()
        .any(|prefix| url.path().starts_with(prefix.as_str()))
  }
}
