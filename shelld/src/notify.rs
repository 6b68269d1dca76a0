use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const NOTIFICATION_TITLE: &str = "ARGUS Glass";
pub const DEFAULT_BODY: &str = "ARGUS Glass emergency notification";
pub const ICON: &str = "/icon-192x192.png";
pub const EMERGENCY_TAG: &str = "argus-emergency";

/// Incoming push data. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub tag: String,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// Build the emergency notification for a push, keeping the default
    /// body when the payload has none or an empty one.
    pub fn emergency(payload: Option<&PushPayload>) -> Self {
        let body = payload
            .and_then(|p| p.body.as_deref())
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_BODY);
        Self {
            title: NOTIFICATION_TITLE.into(),
            body: body.into(),
            icon: ICON.into(),
            badge: ICON.into(),
            vibrate: vec![200, 100, 200],
            tag: EMERGENCY_TAG.into(),
            require_interaction: true,
            actions: vec![NotificationAction {
                action: "open".into(),
                title: "Open App".into(),
            }],
        }
    }
}

/// Displays notifications to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// [`Notifier`] that only records notifications in the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn show(&self, notification: &Notification) -> anyhow::Result<()> {
        info!(
            title = %notification.title,
            tag = %notification.tag,
            "notification: {}",
            notification.body
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emergency_uses_default_body() {
        let n = Notification::emergency(None);
        assert_eq!(n.title, "ARGUS Glass");
        assert_eq!(n.body, DEFAULT_BODY);
        assert_eq!(n.vibrate, [200, 100, 200]);
        assert!(n.require_interaction);
        assert_eq!(n.actions[0].action, "open");

        let empty: PushPayload = serde_json::from_str(r#"{"body":""}"#).unwrap();
        assert_eq!(Notification::emergency(Some(&empty)).body, DEFAULT_BODY);
    }

    #[test]
    fn emergency_uses_payload_body() {
        let payload: PushPayload = serde_json::from_str(r#"{"body":"Fall detected"}"#).unwrap();
        let n = Notification::emergency(Some(&payload));
        assert_eq!(n.body, "Fall detected");
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["requireInteraction"], true);
        assert_eq!(json["badge"], ICON);
    }
}
