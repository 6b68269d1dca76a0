//! Typed lifecycle events for the shell worker.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::clients::ClickOutcome;
use crate::error::{LifecycleError, NetworkError};
use crate::manager::{
    ActivationReport, AssetCacheManager, ControlMessage, ControlReply, InstallReport, ROOT_PATH,
};
use crate::notify::{Notification, Notifier, PushPayload};
use crate::request::{AssetRequest, AssetResponse};

pub const SYNC_TAG: &str = "argus-sync";

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(AssetRequest),
    Message(ControlMessage),
    Push(Option<PushPayload>),
    NotificationClick,
    Sync(String),
}

#[derive(Debug)]
pub enum EventOutcome {
    Installed(InstallReport),
    Activated(ActivationReport),
    Response(Result<AssetResponse, NetworkError>),
    Reply(Option<ControlReply>),
    Notified(Notification),
    Clicked(ClickOutcome),
    /// Whether a hook was registered for the tag.
    Synced(bool),
}

/// Work replayed when connectivity returns.
#[async_trait]
pub trait SyncHook: Send + Sync {
    async fn sync(&self) -> anyhow::Result<()>;
}

/// Default hook for [`SYNC_TAG`]. There is nothing queued offline yet, so
/// it only records that a sync ran.
pub struct OfflineActions;

#[async_trait]
impl SyncHook for OfflineActions {
    async fn sync(&self) -> anyhow::Result<()> {
        info!("offline actions synced");
        Ok(())
    }
}

pub struct ShellWorker {
    manager: Arc<AssetCacheManager>,
    notifier: Arc<dyn Notifier>,
    sync_hooks: HashMap<String, Arc<dyn SyncHook>>,
}

impl ShellWorker {
    pub fn new(manager: Arc<AssetCacheManager>, notifier: Arc<dyn Notifier>) -> Self {
        let mut sync_hooks: HashMap<String, Arc<dyn SyncHook>> = HashMap::new();
        sync_hooks.insert(SYNC_TAG.to_string(), Arc::new(OfflineActions));
        Self {
            manager,
            notifier,
            sync_hooks,
        }
    }

    /// Register `hook` for sync events tagged `tag`, replacing any previous one.
    pub fn on_sync(mut self, tag: impl Into<String>, hook: Arc<dyn SyncHook>) -> Self {
        self.sync_hooks.insert(tag.into(), hook);
        self
    }

    pub fn manager(&self) -> &Arc<AssetCacheManager> {
        &self.manager
    }

    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome, LifecycleError> {
        Ok(match event {
            WorkerEvent::Install => EventOutcome::Installed(self.manager.install().await),
            WorkerEvent::Activate => EventOutcome::Activated(self.manager.activate().await?),
            WorkerEvent::Fetch(request) => {
                EventOutcome::Response(self.manager.respond(&request).await)
            }
            WorkerEvent::Message(message) => {
                EventOutcome::Reply(self.manager.handle_message(message))
            }
            WorkerEvent::Push(payload) => EventOutcome::Notified(self.push(payload.as_ref()).await),
            WorkerEvent::NotificationClick => EventOutcome::Clicked(
                self.manager
                    .client_registry()
                    .focus_or_open(ROOT_PATH, Some(self.manager.current_generation()))
                    .await,
            ),
            WorkerEvent::Sync(tag) => EventOutcome::Synced(self.sync(&tag).await),
        })
    }

    async fn push(&self, payload: Option<&PushPayload>) -> Notification {
        info!("push received");
        let notification = Notification::emergency(payload);
        if let Err(e) = self.notifier.show(&notification).await {
            warn!(error = %e, "failed to show notification");
        }
        notification
    }

    async fn sync(&self, tag: &str) -> bool {
        info!(%tag, "background sync");
        let Some(hook) = self.sync_hooks.get(tag) else {
            return false;
        };
        if let Err(e) = hook.sync().await {
            warn!(%tag, error = %e, "sync failed");
        }
        true
    }

    /// Install, then activate straight away when allowed.
    pub async fn start(&self) -> Result<(InstallReport, Option<ActivationReport>), LifecycleError> {
        let installed = self.manager.install().await;
        let activated = if self.manager.ready_to_activate().await {
            Some(self.manager.activate().await?)
        } else {
            None
        };
        Ok((installed, activated))
    }
}
