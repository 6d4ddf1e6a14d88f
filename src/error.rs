use thiserror::Error;

/// A network request that did not produce a response.
///
/// An HTTP error status is still a response and is never reported here.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("request to {url} failed: {source}")]
  Transport {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("invalid request method {0:?}")]
  InvalidMethod(String),
}

/// An asset that could not be cached during population.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAsset {
  pub url: String,
  pub reason: String,
}

#[derive(Debug, Error)]
pub enum PopulateError {
  /// Atomic population aborted, nothing was written.
  #[error("{} of {total} assets could not be cached", .failed.len())]
  Incomplete {
    failed: Vec<FailedAsset>,
    total: usize,
  },

  #[error("cache storage failed: {0:#}")]
  Storage(color_eyre::Report),
}

impl From<color_eyre::Report> for PopulateError {
  fn from(report: color_eyre::Report) -> Self {
    Self::Storage(report)
  }
}
