use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::time::Duration;

use crate::cache::StoredResponse;
use crate::error::FetchError;

use super::request::AssetRequest;

/// Performs network requests on behalf of the cache manager.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
  async fn fetch(&self, request: &AssetRequest) -> Result<StoredResponse, FetchError>;
}

/// HTTP client wrapper
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  /// Create a fetcher. Without a timeout a hung request simply never resolves.
  pub fn new(timeout: Option<Duration>) -> Result<Self> {
    let mut builder = reqwest::Client::builder().user_agent(concat!(
      env!("CARGO_PKG_NAME"),
      "/",
      env!("CARGO_PKG_VERSION")
    ));
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &AssetRequest) -> Result<StoredResponse, FetchError> {
    let method = Method::from_bytes(request.method.as_bytes())
      .map_err(|_| FetchError::InvalidMethod(request.method.clone()))?;

    let transport = |source| FetchError::Transport {
      url: request.url.to_string(),
      source,
    };

    let response = self
      .client
      .request(method, request.url.clone())
      .send()
      .await
      .map_err(transport)?;

    let url = response.url().to_string();
    let status = response.status().as_u16();
    // Non-UTF-8 header values are dropped
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|value| (name.as_str().to_string(), value.to_string()))
      })
      .collect();

    let body = response.bytes().await.map_err(transport)?.to_vec();

    Ok(StoredResponse {
      url,
      status,
      headers,
      body,
    })
  }
}
