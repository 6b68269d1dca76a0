//! Registry of open application instances.

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

pub type ClientId = u64;

pub const MAX_CLIENTS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub id: ClientId,
    /// Path the instance currently shows.
    pub path: String,
    /// Generation controlling this instance, if any.
    pub controller: Option<String>,
    pub focused: bool,
}

/// Result of handling a notification click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "client", rename_all = "snake_case")]
pub enum ClickOutcome {
    Focused(ClientId),
    Opened(ClientId),
}

#[derive(Default)]
struct Inner {
    next_id: ClientId,
    clients: Vec<ClientInfo>,
}

#[derive(Default)]
pub struct Clients {
    inner: Mutex<Inner>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new instance showing `path`.
    pub async fn register(&self, path: &str, controller: Option<&str>) -> ClientId {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.clients.push(ClientInfo {
            id,
            path: path.to_string(),
            controller: controller.map(str::to_string),
            focused: false,
        });
        id
    }

    /// Record a navigation to `path`, reusing an instance already there.
    ///
    /// At most [`MAX_CLIENTS`] are tracked; the oldest are forgotten first.
    pub async fn visit(&self, path: &str, controller: Option<&str>) -> ClientId {
        {
            let inner = self.inner.lock().await;
            if let Some(existing) = inner.clients.iter().find(|c| c.path == path) {
                return existing.id;
            }
        }
        let id = self.register(path, controller).await;
        let mut inner = self.inner.lock().await;
        let excess = inner.clients.len().saturating_sub(MAX_CLIENTS);
        inner.clients.drain(..excess);
        id
    }

    pub async fn unregister(&self, id: ClientId) -> bool {
        let mut inner = self.inner.lock().await;
        let before = inner.clients.len();
        inner.clients.retain(|c| c.id != id);
        inner.clients.len() != before
    }

    pub async fn list(&self) -> Vec<ClientInfo> {
        self.inner.lock().await.clients.clone()
    }

    /// Put every open instance under `generation`. Returns how many changed.
    pub async fn claim(&self, generation: &str) -> usize {
        let mut inner = self.inner.lock().await;
        let mut claimed = 0;
        for client in &mut inner.clients {
            if client.controller.as_deref() != Some(generation) {
                client.controller = Some(generation.to_string());
                claimed += 1;
            }
        }
        if claimed > 0 {
            info!(claimed, generation, "claimed open clients");
        }
        claimed
    }

    /// Focus the first instance at `path`, or open a new one there.
    pub async fn focus_or_open(&self, path: &str, controller: Option<&str>) -> ClickOutcome {
        {
            let mut inner = self.inner.lock().await;
            let target = inner.clients.iter().position(|c| c.path == path);
            if let Some(idx) = target {
                for (i, client) in inner.clients.iter_mut().enumerate() {
                    client.focused = i == idx;
                }
                return ClickOutcome::Focused(inner.clients[idx].id);
            }
        }
        let id = self.register(path, controller).await;
        let mut inner = self.inner.lock().await;
        for client in &mut inner.clients {
            client.focused = client.id == id;
        }
        ClickOutcome::Opened(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_takes_over_every_instance_once() {
        let clients = Clients::new();
        clients.register("/", None).await;
        clients.register("/navigate", Some("argus-glass-v0")).await;
        assert_eq!(clients.claim("argus-glass-v1").await, 2);
        assert_eq!(clients.claim("argus-glass-v1").await, 0);
        assert!(clients
            .list()
            .await
            .iter()
            .all(|c| c.controller.as_deref() == Some("argus-glass-v1")));
    }

    #[tokio::test]
    async fn visits_reuse_instances_and_stay_bounded() {
        let clients = Clients::new();
        let root = clients.visit("/", None).await;
        assert_eq!(clients.visit("/", None).await, root);
        for i in 0..MAX_CLIENTS {
            clients.visit(&format!("/page/{i}"), None).await;
        }
        let list = clients.list().await;
        assert_eq!(list.len(), MAX_CLIENTS);
        assert!(list.iter().all(|c| c.id != root));
    }

    #[tokio::test]
    async fn click_focuses_root_instance() {
        let clients = Clients::new();
        clients.register("/settings", None).await;
        let root = clients.register("/", None).await;
        assert_eq!(
            clients.focus_or_open("/", None).await,
            ClickOutcome::Focused(root)
        );
        assert_eq!(clients.list().await.len(), 2);
    }

    #[tokio::test]
    async fn click_opens_root_when_absent() {
        let clients = Clients::new();
        clients.register("/read-text", None).await;
        let ClickOutcome::Opened(id) = clients.focus_or_open("/", Some("v1")).await else {
            panic!("expected a new instance");
        };
        let list = clients.list().await;
        let opened = list.iter().find(|c| c.id == id).unwrap();
        assert_eq!(opened.path, "/");
        assert!(opened.focused);
        assert!(clients.unregister(id).await);
        assert!(!clients.unregister(id).await);
    }
}
