//! In-app notification delivery. Fire-and-forget: failures are logged,
//! never surfaced to the engine.

use async_trait::async_trait;
use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub user_id: String,
    pub title: String,
    pub message: String,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, user_ids: &[String], title: &str, message: &str);
}

#[derive(Default)]
pub struct InMemoryNotificationSink {
    delivered: RwLock<Vec<Notification>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.read().clone()
    }

    pub fn delivered_to(&self, user_id: &str) -> Vec<Notification> {
        self.delivered
            .read()
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn notify(&self, user_ids: &[String], title: &str, message: &str) {
        let mut guard = self.delivered.write();
        for user_id in user_ids {
            guard.push(Notification {
                user_id: user_id.clone(),
                title: title.to_string(),
                message: message.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_to_all_users() {
        let sink = InMemoryNotificationSink::new();
        sink.notify(&["u1".into(), "u2".into()], "Approval", "please review")
            .await;
        assert_eq!(sink.delivered().len(), 2);
        assert_eq!(sink.delivered_to("u2").len(), 1);
    }
}
