use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::models::party::Role;

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub user_id: i64,
    pub role: Role,
    pub title: String,
    pub body: String,
    pub data: Value,
}

/// Push delivery. Returns `false` when the push could not be dispatched.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> bool;
}

/// Writes each push to the log instead of handing it to a push vendor.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> bool {
        info!(
            user_id = notification.user_id,
            role = %notification.role,
            title = %notification.title,
            "push dispatched"
        );
        true
    }
}
