//! Asset cache manager: store lifecycle, population and request resolution.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheStorage, CachedEntry, RequestKey, Resolved, StoredResponse};
use crate::config::{Config, PopulationMode, Strategy};
use crate::error::{FailedAsset, FetchError, PopulateError};
use crate::net::{AssetRequest, Fetcher};

use super::lifecycle::{ClientId, ClientRegistry, WorkerState};
use super::message::HostMessage;
use super::settings::Settings;

/// Outcome of a population phase that was allowed to complete.
#[derive(Debug, Clone, Default)]
pub struct PopulationReport {
  /// Number of entries written to the store
  pub stored: usize,
  /// Assets that were skipped (best-effort mode only)
  pub failed: Vec<FailedAsset>,
}

#[derive(Debug, Clone, Default)]
pub struct ActivationReport {
  /// Stale stores that were deleted
  pub deleted: Vec<String>,
  /// Open pages that changed controller
  pub claimed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentPhase {
  Pending,
  Running,
  Done,
}

#[derive(Debug)]
struct Lifecycle {
  state: WorkerState,
  skip_waiting: bool,
  content: ContentPhase,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mediates every request of the hosting page between one active cache
/// store and the network.
///
/// The host runtime owns the interception boundary and calls into the
/// manager for each lifecycle event, message and request. Every call
/// returns only once its work is done, except the background refreshes
/// spawned by stale-while-revalidate, which [`settle`](Self::settle) awaits.
pub struct AssetCacheManager<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  settings: Arc<Settings>,
  lifecycle: Mutex<Lifecycle>,
  clients: Mutex<ClientRegistry>,
  revalidations: Mutex<JoinSet<()>>,
}

impl<S: CacheStorage, F: Fetcher> AssetCacheManager<S, F> {
  /// Build a manager for the configured version, picking up the lifecycle
  /// state a previous run recorded for its store.
  pub fn new(config: &Config, storage: S, fetcher: F) -> Result<Self> {
    let settings = Settings::from_config(config)?;

    let state = match storage.store_state(&settings.store_name)? {
      Some(label) => WorkerState::from_recorded(&label).unwrap_or_else(|| {
        warn!(store = %settings.store_name, state = %label, "Ignoring unknown recorded state");
        WorkerState::Parsed
      }),
      None => WorkerState::Parsed,
    };
    if state != WorkerState::Parsed {
      debug!(store = %settings.store_name, %state, "Restored recorded state");
    }
    let skip_waiting = state == WorkerState::Installed && settings.skip_waiting;

    Ok(Self {
      storage: Arc::new(storage),
      fetcher: Arc::new(fetcher),
      settings: Arc::new(settings),
      lifecycle: Mutex::new(Lifecycle {
        state,
        skip_waiting,
        content: ContentPhase::Pending,
      }),
      clients: Mutex::new(ClientRegistry::default()),
      revalidations: Mutex::new(JoinSet::new()),
    })
  }

  pub fn state(&self) -> WorkerState {
    lock(&self.lifecycle).state
  }

  fn set_state(&self, state: WorkerState) {
    lock(&self.lifecycle).state = state;
  }

  /// Set a settled state and record it with the store, so a later run of
  /// the same version resumes from it.
  fn record_state(&self, state: WorkerState) {
    self.set_state(state);
    if let Err(e) = self
      .storage
      .set_store_state(&self.settings.store_name, &state.to_string())
    {
      warn!(%state, error = %e, "Failed to record state");
    }
  }

  /// Name of the store owned by this version.
  pub fn store_name(&self) -> &str {
    &self.settings.store_name
  }

  /// Base that relative request URLs resolve against.
  pub fn base_url(&self) -> &Url {
    &self.settings.base_url
  }

  // ==========================================================================
  // Lifecycle
  // ==========================================================================

  /// Open this version's store and populate it with the shell assets.
  ///
  /// A failed install leaves the version redundant.
  pub async fn install(&self) -> Result<PopulationReport, PopulateError> {
    self.set_state(WorkerState::Installing);
    info!(
      store = %self.settings.store_name,
      assets = self.settings.shell.len(),
      "Installing"
    );

    match self.install_shell().await {
      Ok(report) => {
        self.record_state(WorkerState::Installed);
        let mut lifecycle = lock(&self.lifecycle);
        if self.settings.skip_waiting {
          lifecycle.skip_waiting = true;
        }
        info!(
          stored = report.stored,
          failed = report.failed.len(),
          skip_waiting = lifecycle.skip_waiting,
          "Install complete"
        );
        Ok(report)
      }
      Err(e) => {
        self.record_state(WorkerState::Redundant);
        error!(error = %e, "Install failed");
        Err(e)
      }
    }
  }

  async fn install_shell(&self) -> Result<PopulationReport, PopulateError> {
    self.storage.open_store(&self.settings.store_name)?;
    self.populate(&self.settings.shell).await
  }

  /// Whether an installed version may take over now: either skip-waiting
  /// was signalled or no open page is held by another version.
  pub fn ready_to_activate(&self) -> bool {
    let lifecycle = lock(&self.lifecycle);
    lifecycle.state == WorkerState::Installed
      && (lifecycle.skip_waiting || !lock(&self.clients).held_by_other(&self.settings.version))
  }

  /// Delete every store except this version's and take control of all open
  /// pages. Failure to delete a stale store is logged, not fatal.
  pub async fn activate(&self) -> Result<ActivationReport> {
    if self.state() == WorkerState::Redundant {
      return Err(eyre!(
        "Version {} failed to install and cannot be activated",
        self.settings.version
      ));
    }

    self.storage.open_store(&self.settings.store_name)?;
    self.set_state(WorkerState::Activating);
    info!(store = %self.settings.store_name, "Activating");

    let mut deleted = Vec::new();
    match self.storage.store_names() {
      Ok(names) => {
        for name in names
          .into_iter()
          .filter(|name| *name != self.settings.store_name)
        {
          match self.storage.delete_store(&name) {
            Ok(true) => {
              info!(store = %name, "Deleted old cache");
              deleted.push(name);
            }
            Ok(false) => {}
            Err(e) => warn!(store = %name, error = %e, "Failed to delete old cache"),
          }
        }
      }
      Err(e) => warn!(error = %e, "Failed to enumerate caches, stale stores kept"),
    }

    let claimed = lock(&self.clients).claim(&self.settings.version);
    self.record_state(WorkerState::Activated);
    info!(deleted = deleted.len(), claimed, "Activated");

    Ok(ActivationReport { deleted, claimed })
  }

  // ==========================================================================
  // Clients
  // ==========================================================================

  /// Register an open page. `controller` is the version currently serving
  /// it; pages opened after activation are controlled by this version.
  pub fn connect_client(&self, controller: Option<&str>) -> ClientId {
    let controller = if self.state() == WorkerState::Activated {
      Some(self.settings.version.as_str())
    } else {
      controller
    };
    lock(&self.clients).connect(controller)
  }

  pub fn disconnect_client(&self, id: ClientId) -> bool {
    lock(&self.clients).disconnect(id)
  }

  pub fn client_controller(&self, id: ClientId) -> Option<String> {
    lock(&self.clients).controller(id).map(String::from)
  }

  // ==========================================================================
  // Population
  // ==========================================================================

  /// Cache the content list into this version's store.
  ///
  /// Runs at most once per manager; returns `None` when it already ran or is
  /// running. A failed attempt may be retried.
  pub async fn populate_content(&self) -> Result<Option<PopulationReport>, PopulateError> {
    {
      let mut lifecycle = lock(&self.lifecycle);
      if lifecycle.content != ContentPhase::Pending {
        info!("Content caching already requested, ignoring");
        return Ok(None);
      }
      lifecycle.content = ContentPhase::Running;
    }

    info!(
      assets = self.settings.content.len(),
      "Starting background cache of content"
    );
    let result = self.populate(&self.settings.content).await;

    lock(&self.lifecycle).content = match result {
      Ok(_) => ContentPhase::Done,
      Err(_) => ContentPhase::Pending,
    };

    let report = result?;
    info!(
      stored = report.stored,
      failed = report.failed.len(),
      "Content cached"
    );
    Ok(Some(report))
  }

  /// Fetch every asset concurrently, then write according to the
  /// population mode. Returns only once every asset has been attempted.
  async fn populate(&self, assets: &[AssetRequest]) -> Result<PopulationReport, PopulateError> {
    let fetcher = &self.fetcher;
    let outcomes = join_all(
      assets
        .iter()
        .map(|request| async move { (request, fetcher.fetch(request).await) }),
    )
    .await;

    let mut entries = Vec::with_capacity(assets.len());
    let mut failed = Vec::new();
    for (request, outcome) in outcomes {
      match outcome {
        Ok(response) if response.is_ok() => entries.push((request.key(), response)),
        Ok(response) => failed.push(FailedAsset {
          url: request.url.to_string(),
          reason: format!("HTTP status {}", response.status),
        }),
        Err(e) => failed.push(FailedAsset {
          url: request.url.to_string(),
          reason: e.to_string(),
        }),
      }
    }

    for failure in &failed {
      warn!(url = %failure.url, reason = %failure.reason, "Failed to fetch asset");
    }

    if !failed.is_empty() && self.settings.population == PopulationMode::Atomic {
      return Err(PopulateError::Incomplete {
        failed,
        total: assets.len(),
      });
    }

    self
      .storage
      .put_entries(&self.settings.store_name, &entries)?;

    Ok(PopulationReport {
      stored: entries.len(),
      failed,
    })
  }

  // ==========================================================================
  // Resolution
  // ==========================================================================

  /// Answer an intercepted request from the store or the network.
  ///
  /// Non-GET, non-HTTP and excluded requests go straight to the network and
  /// are never stored. A network failure with no cached fallback is returned
  /// to the caller as is.
  pub async fn resolve(&self, request: &AssetRequest) -> Result<Resolved, FetchError> {
    if !request.is_get()
      || !request.is_http()
      || self.settings.exclusions.matches(&request.url)
    {
      debug!(method = %request.method, url = %request.url, "Bypassing cache");
      return self.fetcher.fetch(request).await.map(Resolved::bypass);
    }

    let key = request.key();
    match self.settings.strategy {
      Strategy::CacheFirst => {
        if let Some(entry) = self.lookup(&key) {
          debug!(%key, "Cache hit");
          return Ok(Resolved::from_cache(entry));
        }
        self
          .fetch_and_store(request)
          .await
          .map(Resolved::from_network)
      }
      Strategy::StaleWhileRevalidate => {
        if let Some(entry) = self.lookup(&key) {
          debug!(%key, "Cache hit, revalidating in background");
          self.spawn_revalidation(request.clone());
          return Ok(Resolved::from_cache(entry));
        }
        self
          .fetch_and_store(request)
          .await
          .map(Resolved::from_network)
      }
      Strategy::NetworkFirst => match self.fetch_and_store(request).await {
        Ok(response) => Ok(Resolved::from_network(response)),
        Err(e) => match self.lookup(&key) {
          Some(entry) => {
            warn!(%key, error = %e, "Network failed, serving cached response");
            Ok(Resolved::offline(entry))
          }
          None => Err(e),
        },
      },
    }
  }

  /// Storage errors on the request path count as a miss.
  fn lookup(&self, key: &RequestKey) -> Option<CachedEntry> {
    match self.storage.get_entry(&self.settings.store_name, key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(%key, error = %e, "Cache lookup failed, treating as miss");
        None
      }
    }
  }

  async fn fetch_and_store(&self, request: &AssetRequest) -> Result<StoredResponse, FetchError> {
    let response = self.fetcher.fetch(request).await?;

    if self.settings.should_store(request, &response) {
      let key = request.key();
      match self
        .storage
        .put_entry(&self.settings.store_name, &key, &response)
      {
        Ok(()) => debug!(%key, "Stored network response"),
        Err(e) => warn!(%key, error = %e, "Failed to store network response"),
      }
    }

    Ok(response)
  }

  fn spawn_revalidation(&self, request: AssetRequest) {
    let storage = Arc::clone(&self.storage);
    let fetcher = Arc::clone(&self.fetcher);
    let store = self.settings.store_name.clone();

    let mut tasks = lock(&self.revalidations);
    // Reap refreshes that already finished
    while tasks.try_join_next().is_some() {}

    tasks.spawn(async move {
      let key = request.key();
      match fetcher.fetch(&request).await {
        Ok(response) if response.is_ok() => match storage.put_entry(&store, &key, &response) {
          Ok(()) => debug!(%key, "Revalidated cached entry"),
          Err(e) => warn!(%key, error = %e, "Failed to store revalidated entry"),
        },
        Ok(response) => {
          debug!(%key, status = response.status, "Revalidation got error status, keeping entry")
        }
        Err(e) => debug!(%key, error = %e, "Revalidation failed, keeping entry"),
      }
    });
  }

  /// Wait for every background revalidation to finish.
  pub async fn settle(&self) {
    loop {
      let mut tasks = std::mem::take(&mut *lock(&self.revalidations));
      if tasks.is_empty() {
        break;
      }
      while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
          warn!(error = %e, "Revalidation task panicked");
        }
      }
    }
  }

  // ==========================================================================
  // Host messages
  // ==========================================================================

  /// Dispatch a signal posted by the hosting page.
  ///
  /// Content caching failures are logged and swallowed; the page that sent
  /// the signal does not wait on them.
  pub async fn handle_message(&self, message: HostMessage) -> Result<()> {
    match message {
      HostMessage::CacheContent => {
        info!("Received message to cache content");
        if let Err(e) = self.populate_content().await {
          error!(error = %e, "Failed to cache content");
        }
      }
      HostMessage::SkipWaiting => {
        info!("Received message to skip waiting");
        lock(&self.lifecycle).skip_waiting = true;
        if self.ready_to_activate() {
          self.activate().await?;
        } else {
          debug!(state = %self.state(), "No installed version waiting");
        }
      }
      HostMessage::Unknown => debug!("Ignoring unknown host message"),
    }
    Ok(())
  }

  // ==========================================================================
  // Inspection
  // ==========================================================================

  pub fn store_names(&self) -> Result<Vec<String>> {
    self.storage.store_names()
  }

  /// Request identities cached in `store`.
  pub fn cached_keys(&self, store: &str) -> Result<Vec<String>> {
    self.storage.entry_keys(store)
  }
}
