// User-facing notifications (connection loss, service errors, export results).

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    /// Stays until dismissed by the user rather than timing out.
    pub persistent: bool,
}

/// Fan-out of notifications to any number of front-ends.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Error => {
                warn!(title = %notification.title, persistent = notification.persistent, "{}", notification.message)
            }
            _ => info!(title = %notification.title, "{}", notification.message),
        }
        // No receivers is fine; the tracing mirror above still records it.
        let _ = self.tx.send(notification);
    }

    /// Transport-level failure: stays until dismissed.
    pub fn persistent_error(&self, title: &str, message: impl Into<String>) {
        self.notify(Notification {
            level: NotificationLevel::Error,
            title: title.into(),
            message: message.into(),
            persistent: true,
        });
    }

    /// Protocol-level failure reported by the service.
    pub fn transient_error(&self, title: &str, message: impl Into<String>) {
        self.notify(Notification {
            level: NotificationLevel::Error,
            title: title.into(),
            message: message.into(),
            persistent: false,
        });
    }

    pub fn persistent_info(&self, title: &str, message: impl Into<String>) {
        self.notify(Notification {
            level: NotificationLevel::Info,
            title: title.into(),
            message: message.into(),
            persistent: true,
        });
    }

    pub fn success(&self, title: &str, message: impl Into<String>) {
        self.notify(Notification {
            level: NotificationLevel::Success,
            title: title.into(),
            message: message.into(),
            persistent: false,
        });
    }
}
