//! Offline shell for the ARGUS Glass web app.
//!
//! `shelld` sits between the browser and the app server. It pre-caches the
//! shell's assets under a versioned cache generation, serves navigations
//! from the network with a cached fallback, and answers everything else
//! cache-first.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use url::Url;

pub mod clients;
pub mod error;
pub mod manager;
pub mod network;
pub mod notify;
pub mod request;
pub mod server;
pub mod store;
pub mod worker;

pub use error::{CacheError, LifecycleError, NetworkError};
pub use manager::{AssetCacheManager, AssetManifest, CACHE_GENERATION, LifecycleState};
pub use worker::{EventOutcome, ShellWorker, WorkerEvent};

use network::HttpNetwork;
use notify::LogNotifier;
use store::{CacheStorage, DiskCacheStorage, MemoryCacheStorage};

#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub listen: SocketAddr,
    /// Origin of the app server being shelled.
    pub upstream: Url,
    /// Persistent cache root; memory only when unset.
    pub cache_dir: Option<PathBuf>,
    pub generation: String,
    pub manifest: AssetManifest,
}

/// Build the worker for `config`, install and activate it.
pub async fn start_worker(config: &ShellConfig) -> anyhow::Result<Arc<ShellWorker>> {
    let storage: Arc<dyn CacheStorage> = match &config.cache_dir {
        Some(dir) => Arc::new(DiskCacheStorage::new(dir)),
        None => Arc::new(MemoryCacheStorage::new()),
    };
    let manager = AssetCacheManager::new(
        config.upstream.clone(),
        storage,
        Arc::new(HttpNetwork::new()),
    )
    .generation(config.generation.clone())
    .manifest(config.manifest.clone());
    let worker = Arc::new(ShellWorker::new(Arc::new(manager), Arc::new(LogNotifier)));

    let (installed, activated) = worker.start().await?;
    info!(
        generation = %installed.generation,
        cached = installed.cached.len(),
        failed = installed.failed.len(),
        activated = activated.is_some(),
        "shell ready"
    );
    Ok(worker)
}

/// Serve the shell until ctrl-c.
pub async fn run(config: ShellConfig) -> anyhow::Result<()> {
    let worker = start_worker(&config).await?;
    let app = server::router(worker, config.upstream.clone());
    let listener = TcpListener::bind(config.listen).await?;
    info!(addr = %listener.local_addr()?, upstream = %config.upstream, "shell proxy listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
