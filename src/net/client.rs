//! HTTP fetch backend over reqwest.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};

use crate::cache::{FetchRequest, StoredResponse};

/// Network seam for the cache worker.
///
/// `Err` means a network-level failure: no response was obtained at all.
/// Any response, success or not, comes back as `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &FetchRequest) -> Result<StoredResponse>;
}

/// Fetcher backed by a reqwest client.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &FetchRequest) -> Result<StoredResponse> {
    let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Fetch failed for {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body from {}: {}", request.url, e))?
      .to_vec();

    Ok(StoredResponse::new(status, headers, body))
  }
}
