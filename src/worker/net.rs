//! Network side of the worker: fetching assets over HTTP.

use async_trait::async_trait;
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use url::Url;

use crate::cache::CachedAsset;

/// Trait for fetching an asset from the network.
///
/// Transport failures (DNS, connect, timeout) surface as errors; HTTP error
/// statuses surface as snapshots carrying that status, so callers decide
/// whether a non-2xx response is acceptable.
#[async_trait]
pub trait NetworkFetch: Send + Sync {
  async fn fetch(&self, url: &Url) -> Result<CachedAsset>;
}

/// reqwest-backed fetcher with a bounded per-request timeout.
///
/// The timeout keeps a hung server from stalling install forever; without it
/// a single dead manifest URL would block the new generation indefinitely.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl NetworkFetch for HttpFetcher {
  async fn fetch(&self, url: &Url) -> Result<CachedAsset> {
    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?
      .to_vec();

    Ok(CachedAsset {
      url: url.as_str().to_string(),
      status,
      content_type,
      body,
      fetched_at: Utc::now(),
    })
  }
}
