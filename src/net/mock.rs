//! Canned fetch backend for tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::cache::{FetchRequest, StoredResponse};
use crate::net::Fetcher;

/// Fetcher serving canned responses, with failure switches and a call counter.
pub struct MockFetcher {
  routes: Mutex<HashMap<String, StoredResponse>>,
  failing: Mutex<HashSet<String>>,
  offline: AtomicBool,
  calls: AtomicUsize,
}

impl MockFetcher {
  pub fn new() -> Self {
    Self {
      routes: Mutex::new(HashMap::new()),
      failing: Mutex::new(HashSet::new()),
      offline: AtomicBool::new(false),
      calls: AtomicUsize::new(0),
    }
  }

  /// Register a canned response for a URL.
  pub fn route(&self, url: &str, response: StoredResponse) {
    self.routes.lock().unwrap().insert(url.to_string(), response);
  }

  /// Register a 200 text response for a URL.
  pub fn route_ok(&self, url: &str, body: &str) {
    self.route(
      url,
      StoredResponse::new(
        200,
        vec![("content-type".to_string(), "text/plain".to_string())],
        body.as_bytes().to_vec(),
      ),
    );
  }

  /// Make fetches for a single URL fail at the network level.
  pub fn fail_url(&self, url: &str) {
    self.failing.lock().unwrap().insert(url.to_string());
  }

  /// Make every fetch fail at the network level.
  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Number of fetch attempts made so far.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Fetcher for MockFetcher {
  async fn fetch(&self, request: &FetchRequest) -> Result<StoredResponse> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    let url = request.url.as_str().to_string();

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("network unreachable: {}", url));
    }
    if self.failing.lock().unwrap().contains(&url) {
      return Err(eyre!("connection refused: {}", url));
    }

    self
      .routes
      .lock()
      .unwrap()
      .get(&url)
      .cloned()
      .ok_or_else(|| eyre!("no canned route for {}", url))
  }
}
