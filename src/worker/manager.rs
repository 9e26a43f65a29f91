//! The offline cache manager: generation lifecycle, per-request strategy
//! dispatch, control messages and submission replay.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::cache::{FetchRequest, ServeResult, Stored, StoredResponse, StoreRegistry};
use crate::classify::{Classifier, RequestClass};
use crate::config::Config;
use crate::control::{ControlCommand, ControlReply};
use crate::net::Fetcher;

use super::queue::{QueuedSubmission, PENDING_STORE, SUBMISSION_SYNC_TAG};

/// Generation lifecycle.
///
/// A generation is created on install and supersedes older generations on
/// activate; a failed install or a newer activation retires it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Unregistered,
  Installing,
  /// Installed and eligible to activate immediately
  Installed,
  Activating,
  Active,
  Redundant,
}

/// Notices broadcast to connected page contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientNotice {
  /// This generation activated and took control of open pages
  Claimed { generation: String },
  /// A queued submission was resent successfully
  SubmissionReplayed { id: String },
}

/// The cache manager.
///
/// One instance per process, constructed over a store registry and a fetch
/// backend. Handlers take `&self` and may run concurrently; the stores are
/// the only shared mutable state (last-write-wins per key).
pub struct CacheManager<S: StoreRegistry, F: Fetcher> {
  stores: Arc<S>,
  fetcher: Arc<F>,
  config: Arc<Config>,
  classifier: Classifier,
  state: Mutex<LifecycleState>,
  notices: broadcast::Sender<ClientNotice>,
}

impl<S, F> CacheManager<S, F>
where
  S: StoreRegistry + 'static,
  F: Fetcher + 'static,
{
  pub fn new(config: Config, stores: Arc<S>, fetcher: Arc<F>) -> Result<Self> {
    let classifier = Classifier::from_config(&config)?;
    let (notices, _) = broadcast::channel(64);

    Ok(Self {
      stores,
      fetcher,
      config: Arc::new(config),
      classifier,
      state: Mutex::new(LifecycleState::Unregistered),
      notices,
    })
  }

  pub fn generation(&self) -> &str {
    &self.config.cache.generation
  }

  pub fn state(&self) -> LifecycleState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_state(&self, state: LifecycleState) {
    *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
  }

  /// Subscribe to client notices (claims, replay confirmations).
  pub fn subscribe(&self) -> broadcast::Receiver<ClientNotice> {
    self.notices.subscribe()
  }

  /// Name of this generation's static store.
  pub fn static_store(&self) -> String {
    format!("static-{}", self.generation())
  }

  /// Name of this generation's dynamic store.
  pub fn dynamic_store(&self) -> String {
    format!("dynamic-{}", self.generation())
  }

  /// A superseded manager is retired by its replacement's activation.
  #[allow(dead_code)]
  pub fn mark_redundant(&self) {
    self.set_state(LifecycleState::Redundant);
    info!(generation = %self.generation(), "Generation is now redundant");
  }

  // ==========================================================================
  // Lifecycle
  // ==========================================================================

  /// Install this generation: fetch every precache asset and store it.
  ///
  /// All-or-nothing: a single failed fetch (network error, non-2xx status,
  /// or store write failure) fails the install and retires the generation,
  /// so old stores are never cleaned up on behalf of a partial one.
  pub async fn install(&self) -> Result<()> {
    self.set_state(LifecycleState::Installing);
    info!(
      generation = %self.generation(),
      assets = self.config.cache.precache.len(),
      "Installing"
    );

    match self.populate_static_store().await {
      Ok(()) => {
        self.set_state(LifecycleState::Installed);
        info!(generation = %self.generation(), "Install complete; eligible to activate immediately");
        Ok(())
      }
      Err(e) => {
        self.set_state(LifecycleState::Redundant);
        warn!(generation = %self.generation(), error = %e, "Install failed");
        Err(e)
      }
    }
  }

  async fn populate_static_store(&self) -> Result<()> {
    let store = self.static_store();

    for entry in &self.config.cache.precache {
      let url = self.config.resolve(entry)?;
      let request = FetchRequest::get(url);

      let response = self
        .fetcher
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Precache fetch failed for {}: {}", request.url, e))?;
      if !response.is_success() {
        return Err(eyre!(
          "Precache fetch for {} returned status {}",
          request.url,
          response.status
        ));
      }

      self
        .stores
        .put(&store, &request.store_key(), &response)
        .map_err(|e| eyre!("Could not store precached {}: {}", request.url, e))?;
    }

    Ok(())
  }

  /// Activate this generation: delete every store that belongs to neither
  /// this generation nor the pending-submission queue, then claim clients.
  pub async fn activate(&self) -> Result<()> {
    let state = self.state();
    if state != LifecycleState::Installed {
      return Err(eyre!(
        "Cannot activate from {:?}; a successful install is required",
        state
      ));
    }
    self.set_state(LifecycleState::Activating);

    let keep = [self.static_store(), self.dynamic_store(), PENDING_STORE.to_string()];
    match self.stores.list_stores() {
      Ok(names) => {
        for name in names {
          if keep.contains(&name) {
            continue;
          }
          match self.stores.delete_store(&name) {
            Ok(()) => info!(store = %name, "Deleted stale cache store"),
            Err(e) => warn!(store = %name, error = %e, "Could not delete stale store"),
          }
        }
      }
      Err(e) => warn!(error = %e, "Could not enumerate stores; skipping cleanup"),
    }

    self.set_state(LifecycleState::Active);
    let _ = self.notices.send(ClientNotice::Claimed {
      generation: self.generation().to_string(),
    });
    info!(generation = %self.generation(), "Activated and claimed open clients");

    Ok(())
  }

  // ==========================================================================
  // Fetch interception
  // ==========================================================================

  /// Route an intercepted request through its caching strategy.
  ///
  /// Intercepted requests always resolve to a response; only passthrough
  /// requests (non-GET, non-http) surface network errors to the caller.
  pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<ServeResult> {
    match self.classifier.classify(request) {
      RequestClass::Passthrough => {
        let response = self.fetcher.fetch(request).await?;
        Ok(ServeResult::from_network(response))
      }
      RequestClass::StaticAsset => Ok(self.cache_first(request).await),
      RequestClass::External => Ok(self.stale_while_revalidate(request).await),
      RequestClass::Api | RequestClass::Dynamic => Ok(self.network_first(request).await),
    }
  }

  /// Cache-first: serve a stored copy when present, otherwise fetch and
  /// store. Offline with nothing cached serves the fallback page.
  async fn cache_first(&self, request: &FetchRequest) -> ServeResult {
    let key = request.store_key();

    if let Some(hit) = self.lookup(&key) {
      return ServeResult::from_cache(hit.value);
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store_response(&self.static_store(), &key, &response);
        }
        ServeResult::from_network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Cache-first miss with network down");
        self.offline_fallback()
      }
    }
  }

  /// Network-first: prefer a live response, fall back to cache. Only
  /// network-level failures trigger fallback; non-2xx responses pass
  /// through unchanged and are not stored.
  async fn network_first(&self, request: &FetchRequest) -> ServeResult {
    let key = request.store_key();

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store_response(&self.dynamic_store(), &key, &response);
        }
        ServeResult::from_network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Network-first falling back to cache");

        if let Some(hit) = self.lookup(&key) {
          return ServeResult::from_cache(hit.value);
        }
        if request.is_navigation {
          if let Some(root) = self.cached_root_document() {
            return ServeResult::fallback(root);
          }
        }
        ServeResult::fallback(StoredResponse::offline())
      }
    }
  }

  /// Stale-while-revalidate: serve the stored copy immediately and refresh
  /// it in the background for future requests. The in-flight reply never
  /// waits on the refresh.
  async fn stale_while_revalidate(&self, request: &FetchRequest) -> ServeResult {
    let key = request.store_key();

    if let Some(hit) = self.lookup(&key) {
      self.spawn_revalidate(request.clone());
      return ServeResult::from_cache(hit.value);
    }

    // Nothing cached yet: this request has to wait for the network
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store_response(&self.dynamic_store(), &key, &response);
        }
        ServeResult::from_network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Revalidate miss with network down");
        ServeResult::fallback(StoredResponse::offline())
      }
    }
  }

  fn spawn_revalidate(&self, request: FetchRequest) {
    let fetcher = Arc::clone(&self.fetcher);
    let stores = Arc::clone(&self.stores);
    let store = self.dynamic_store();
    let key = request.store_key();

    tokio::spawn(async move {
      match fetcher.fetch(&request).await {
        Ok(response) if response.is_success() => {
          if let Err(e) = stores.put(&store, &key, &response) {
            warn!(key = %key, error = %e, "Background refresh could not be stored");
          }
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "Background refresh not stored");
        }
        Err(e) => {
          debug!(url = %request.url, error = %e, "Background refresh failed");
        }
      }
    });
  }

  /// Look a key up in this generation's stores, static first.
  ///
  /// Read failures are treated as misses.
  fn lookup(&self, key: &str) -> Option<Stored<StoredResponse>> {
    for store in [self.static_store(), self.dynamic_store()] {
      match self.stores.get::<StoredResponse>(&store, key) {
        Ok(Some(hit)) => {
          debug!(store = %store, key = %key, cached_at = %hit.cached_at, "Cache hit");
          return Some(hit);
        }
        Ok(None) => {}
        Err(e) => warn!(store = %store, key = %key, error = %e, "Cache read failed; treating as miss"),
      }
    }
    None
  }

  /// Write failures are logged and swallowed; the response is still served.
  fn store_response(&self, store: &str, key: &str, response: &StoredResponse) {
    if let Err(e) = self.stores.put(store, key, response) {
      warn!(store = %store, key = %key, error = %e, "Cache write failed");
    }
  }

  /// The cached fallback page, or the synthesized offline response.
  fn offline_fallback(&self) -> ServeResult {
    if let Ok(url) = self.config.resolve(&self.config.site.fallback_page) {
      let key = FetchRequest::get(url).store_key();
      if let Some(hit) = self.lookup(&key) {
        return ServeResult::fallback(hit.value);
      }
    }
    ServeResult::fallback(StoredResponse::offline())
  }

  /// The cached root document for failed navigations.
  fn cached_root_document(&self) -> Option<StoredResponse> {
    for path in ["/", "/index.html"] {
      if let Ok(url) = self.config.resolve(path) {
        let key = FetchRequest::get(url).store_key();
        if let Some(hit) = self.lookup(&key) {
          return Some(hit.value);
        }
      }
    }
    None
  }

  // ==========================================================================
  // Control messages
  // ==========================================================================

  /// Handle an inbound control message from a page context.
  ///
  /// GET_VERSION and CLEAR_CACHE reply on the supplied channel; SKIP_WAITING
  /// and unknown commands send nothing back.
  pub async fn handle_message(&self, command: &str, reply: Option<oneshot::Sender<ControlReply>>) {
    match ControlCommand::parse(command) {
      Some(ControlCommand::SkipWaiting) => {
        if self.state() == LifecycleState::Installed {
          if let Err(e) = self.activate().await {
            warn!(error = %e, "Skip-waiting activation failed");
          }
        } else {
          debug!(state = ?self.state(), "SKIP_WAITING ignored in current state");
        }
      }
      Some(ControlCommand::GetVersion) => {
        if let Some(tx) = reply {
          let _ = tx.send(ControlReply::Version(self.generation().to_string()));
        }
      }
      Some(ControlCommand::ClearCache) => {
        if let Err(e) = self.stores.clear_all() {
          warn!(error = %e, "Cache clear incomplete");
        }
        info!("Cleared all cache stores");
        if let Some(tx) = reply {
          let _ = tx.send(ControlReply::CacheCleared);
        }
      }
      None => {
        debug!(command = %command, "Ignoring unknown control command");
      }
    }
  }

  // ==========================================================================
  // Pending submissions
  // ==========================================================================

  /// Queue a failed outbound request for replay. Identical submissions
  /// collapse onto one entry.
  pub fn enqueue_submission(&self, request: &FetchRequest) -> Result<String> {
    let entry = QueuedSubmission::from_request(request);
    let id = entry.id();

    self.stores.put(PENDING_STORE, &id, &entry)?;
    info!(id = %id, url = %entry.url, "Queued submission for replay");

    Ok(id)
  }

  /// All currently queued submissions.
  pub fn pending_submissions(&self) -> Result<Vec<QueuedSubmission>> {
    let mut entries = Vec::new();
    for key in self.stores.keys(PENDING_STORE)? {
      match self.stores.get::<QueuedSubmission>(PENDING_STORE, &key) {
        Ok(Some(stored)) => entries.push(stored.value),
        Ok(None) => {}
        Err(e) => warn!(id = %key, error = %e, "Skipping unreadable queue entry"),
      }
    }
    Ok(entries)
  }

  /// Handle a background-sync trigger. Unknown tags are ignored.
  pub async fn handle_sync(&self, tag: &str) {
    if tag != SUBMISSION_SYNC_TAG {
      debug!(tag = %tag, "Ignoring unknown sync tag");
      return;
    }
    self.replay_submissions().await;
  }

  /// Resend every queued submission. Successes are removed and announced;
  /// failures stay queued for the next trigger.
  pub async fn replay_submissions(&self) {
    let entries = match self.pending_submissions() {
      Ok(entries) => entries,
      Err(e) => {
        warn!(error = %e, "Could not read pending submissions");
        return;
      }
    };
    if entries.is_empty() {
      return;
    }

    let attempts = entries.iter().map(|entry| self.replay_one(entry));
    let replayed = futures::future::join_all(attempts)
      .await
      .into_iter()
      .filter(|ok| *ok)
      .count();

    info!(
      replayed,
      remaining = entries.len() - replayed,
      "Submission replay finished"
    );
  }

  async fn replay_one(&self, entry: &QueuedSubmission) -> bool {
    let id = entry.id();

    let request = match entry.to_request() {
      Ok(request) => request,
      Err(e) => {
        warn!(id = %id, error = %e, "Queued submission is malformed; leaving in place");
        return false;
      }
    };

    match self.fetcher.fetch(&request).await {
      Ok(response) if response.is_success() => {
        if let Err(e) = self.stores.remove(PENDING_STORE, &id) {
          warn!(id = %id, error = %e, "Replayed submission could not be dequeued");
        }
        let _ = self.notices.send(ClientNotice::SubmissionReplayed { id });
        true
      }
      Ok(response) => {
        warn!(id = %id, status = response.status, "Replay rejected; submission stays queued");
        false
      }
      Err(e) => {
        debug!(id = %id, error = %e, "Replay failed; submission stays queued");
        false
      }
    }
  }
}
