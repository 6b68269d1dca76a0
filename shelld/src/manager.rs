//! Offline asset cache for the application shell.
//!
//! The manager pre-fetches a fixed manifest into a cache tagged with the
//! current generation, purges every other generation when it activates, and
//! then answers requests from the cache or the network.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::Clients;
use crate::error::{LifecycleError, NetworkError};
use crate::network::Network;
use crate::request::{AssetRequest, AssetResponse, CachedAsset, Destination, RequestKey};
use crate::store::CacheStorage;

/// Bump whenever cached asset contents change incompatibly.
pub const CACHE_GENERATION: &str = "argus-glass-v1";

/// Document served when a navigation cannot reach the network.
pub const ROOT_PATH: &str = "/";

pub const DEFAULT_MANIFEST: &[&str] = &[
    "/",
    "/navigate",
    "/read-text",
    "/settings",
    "/about",
    "/manifest.json",
    "/_next/static/css/",
    "/_next/static/js/",
];

/// Paths the shell needs offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
    paths: Vec<String>,
}

impl AssetManifest {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Entries fetched during install. The root and directory prefixes
    /// (anything ending in `/`) are left out.
    pub fn precache_paths(&self) -> impl Iterator<Item = &str> {
        self.paths
            .iter()
            .map(String::as_str)
            .filter(|p| !p.ends_with('/'))
    }
}

impl Default for AssetManifest {
    fn default() -> Self {
        Self::new(DEFAULT_MANIFEST.iter().copied())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub generation: String,
    pub cached: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    pub generation: String,
    pub purged: Vec<String>,
    pub claimed: usize,
}

/// What the manager decided to do with a request.
#[derive(Debug)]
pub enum Interception {
    /// Not ours; the caller fetches it untouched.
    PassThrough,
    Respond(Result<AssetResponse, NetworkError>),
}

/// Commands accepted from the hosting page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    SkipWaiting,
    GetVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlReply {
    pub version: String,
}

pub struct AssetCacheManager {
    origin: Url,
    generation: String,
    manifest: AssetManifest,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    clients: Arc<Clients>,
    lifecycle: Mutex<()>,
    state: watch::Sender<LifecycleState>,
    skip_waiting: AtomicBool,
}

impl AssetCacheManager {
    /// Manage the shell served from `origin` with the default generation
    /// and manifest.
    pub fn new(origin: Url, storage: Arc<dyn CacheStorage>, network: Arc<dyn Network>) -> Self {
        let (state, _) = watch::channel(LifecycleState::Parsed);
        Self {
            origin,
            generation: CACHE_GENERATION.to_string(),
            manifest: AssetManifest::default(),
            storage,
            network,
            clients: Arc::new(Clients::new()),
            lifecycle: Mutex::new(()),
            state,
            skip_waiting: AtomicBool::new(false),
        }
    }

    pub fn generation(mut self, generation: impl Into<String>) -> Self {
        self.generation = generation.into();
        self
    }

    pub fn manifest(mut self, manifest: AssetManifest) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn clients(mut self, clients: Arc<Clients>) -> Self {
        self.clients = clients;
        self
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn current_generation(&self) -> &str {
        &self.generation
    }

    pub fn client_registry(&self) -> &Arc<Clients> {
        &self.clients
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: LifecycleState) {
        debug!(?state, generation = %self.generation, "lifecycle");
        self.state.send_replace(state);
    }

    fn root_key(&self) -> RequestKey {
        let mut root = self.origin.clone();
        root.set_path(ROOT_PATH);
        root.set_query(None);
        root.set_fragment(None);
        RequestKey::new(&Method::GET, &root)
    }

    /// Fetch and store every pre-cacheable manifest entry.
    ///
    /// A failing entry is logged and skipped; install itself never fails.
    /// On completion the manager asks to be activated immediately.
    pub async fn install(&self) -> InstallReport {
        let _lifecycle = self.lifecycle.lock().await;
        self.set_state(LifecycleState::Installing);
        info!(generation = %self.generation, "installing");
        if let Err(e) = self.storage.open(&self.generation).await {
            warn!(error = %e, "failed to open cache generation");
        }

        let fetches = self.manifest.precache_paths().map(|path| async move {
            let outcome = self.precache(path).await;
            (path.to_string(), outcome)
        });
        let mut report = InstallReport {
            generation: self.generation.clone(),
            cached: Vec::new(),
            failed: Vec::new(),
        };
        for (path, outcome) in join_all(fetches).await {
            match outcome {
                Ok(()) => report.cached.push(path),
                Err(reason) => {
                    warn!(%path, %reason, "failed to pre-cache asset");
                    report.failed.push(path);
                }
            }
        }

        info!(
            cached = report.cached.len(),
            failed = report.failed.len(),
            "install complete"
        );
        self.set_state(LifecycleState::Installed);
        self.skip_waiting();
        report
    }

    async fn precache(&self, path: &str) -> Result<(), String> {
        let url = self.origin.join(path).map_err(|e| e.to_string())?;
        let request = AssetRequest::get(url);
        let response = self
            .network
            .fetch(&request)
            .await
            .map_err(|e| e.to_string())?;
        if !response.is_cacheable() {
            return Err(format!("status {}", response.status));
        }
        self.storage
            .put(&self.generation, &request.key(), response.into())
            .await
            .map_err(|e| e.to_string())
    }

    /// Delete every other generation and take control of open instances.
    pub async fn activate(&self) -> Result<ActivationReport, LifecycleError> {
        let _lifecycle = self.lifecycle.lock().await;
        match self.state() {
            LifecycleState::Installed | LifecycleState::Activated => {}
            other => return Err(LifecycleError::NotInstalled(other)),
        }
        self.set_state(LifecycleState::Activating);
        info!(generation = %self.generation, "activating");

        let existing = self.storage.generations().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to list cache generations");
            Vec::new()
        });
        let mut purged = Vec::new();
        for stale in existing.into_iter().filter(|g| *g != self.generation) {
            match self.storage.delete(&stale).await {
                Ok(_) => {
                    info!(generation = %stale, "deleted stale cache");
                    purged.push(stale);
                }
                Err(e) => warn!(generation = %stale, error = %e, "failed to delete stale cache"),
            }
        }
        let claimed = self.clients.claim(&self.generation).await;

        self.set_state(LifecycleState::Activated);
        Ok(ActivationReport {
            generation: self.generation.clone(),
            purged,
            claimed,
        })
    }

    /// Request activation without waiting for the old generation's
    /// instances to close.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    /// Whether an installed generation may activate now.
    pub async fn ready_to_activate(&self) -> bool {
        if self.state() != LifecycleState::Installed {
            return false;
        }
        if self.skip_waiting.load(Ordering::SeqCst) {
            return true;
        }
        self.clients
            .list()
            .await
            .iter()
            .all(|c| c.controller.is_none() || c.controller.as_deref() == Some(&self.generation))
    }

    pub fn handle_message(&self, message: ControlMessage) -> Option<ControlReply> {
        match message {
            ControlMessage::SkipWaiting => {
                info!("skip waiting requested");
                self.skip_waiting();
                None
            }
            ControlMessage::GetVersion => Some(ControlReply {
                version: self.generation.clone(),
            }),
        }
    }

    /// Decide how `request` is answered.
    ///
    /// Nothing is intercepted before activation or across origins.
    pub async fn intercept(&self, request: &AssetRequest) -> Interception {
        if self.state() != LifecycleState::Activated
            || request.url.origin() != self.origin.origin()
        {
            return Interception::PassThrough;
        }
        let response = if request.is_navigation() {
            self.network_first(request).await
        } else {
            self.cache_first(request).await
        };
        Interception::Respond(response)
    }

    /// Fetch without any cache involvement.
    pub async fn passthrough(&self, request: &AssetRequest) -> Result<AssetResponse, NetworkError> {
        self.network.fetch(request).await
    }

    /// Intercept, falling back to a plain fetch for requests not ours.
    pub async fn respond(&self, request: &AssetRequest) -> Result<AssetResponse, NetworkError> {
        match self.intercept(request).await {
            Interception::PassThrough => self.passthrough(request).await,
            Interception::Respond(result) => result,
        }
    }

    async fn network_first(&self, request: &AssetRequest) -> Result<AssetResponse, NetworkError> {
        self.clients
            .visit(request.url.path(), Some(&self.generation))
            .await;
        match self.network.fetch(request).await {
            Ok(response) => {
                if request.method == Method::GET
                    && request.url.path() == ROOT_PATH
                    && response.is_cacheable()
                {
                    self.store(&self.root_key(), &response).await;
                }
                Ok(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "navigation offline");
                self.cached_root().await.ok_or(e)
            }
        }
    }

    async fn cache_first(&self, request: &AssetRequest) -> Result<AssetResponse, NetworkError> {
        let cacheable_method = request.method == Method::GET;
        let key = request.key();
        if cacheable_method {
            if let Some(hit) = self.lookup(&key).await {
                debug!(%key, "cache hit");
                return Ok(hit.into());
            }
        }
        match self.network.fetch(request).await {
            Ok(response) => {
                if cacheable_method && response.is_cacheable() {
                    self.store(&key, &response).await;
                }
                Ok(response)
            }
            Err(e) if request.destination == Destination::Document => {
                self.cached_root().await.ok_or(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn lookup(&self, key: &RequestKey) -> Option<CachedAsset> {
        self.storage
            .get(&self.generation, key)
            .await
            .unwrap_or_else(|e| {
                warn!(%key, error = %e, "cache lookup failed");
                None
            })
    }

    async fn store(&self, key: &RequestKey, response: &AssetResponse) {
        if let Err(e) = self
            .storage
            .put(&self.generation, key, response.clone().into())
            .await
        {
            warn!(%key, error = %e, "cache write failed");
        }
    }

    async fn cached_root(&self) -> Option<AssetResponse> {
        self.lookup(&self.root_key()).await.map(Into::into)
    }
}
