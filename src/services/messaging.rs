//! Outbound message channels.
//!
//! Handlers must degrade gracefully: an unavailable channel yields a
//! `sent: false` receipt, never a failed execution.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::runtime::RuntimeContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub sent: bool,
    pub message_id: Option<String>,
    pub reason: Option<String>,
}

impl DeliveryReceipt {
    pub fn delivered(message_id: String) -> Self {
        Self {
            sent: true,
            message_id: Some(message_id),
            reason: None,
        }
    }

    pub fn undelivered(reason: impl Into<String>) -> Self {
        Self {
            sent: false,
            message_id: None,
            reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> DeliveryReceipt;

    async fn send_sms(&self, phone: &str, message: &str) -> DeliveryReceipt;

    async fn send_whatsapp(&self, phone: &str, message: &str) -> DeliveryReceipt;

    async fn send_chat_message(&self, channel: &str, message: &str) -> DeliveryReceipt;

    async fn send_push(&self, user_id: &str, title: &str, message: &str) -> DeliveryReceipt;
}

/// A message captured by [`InMemoryMessenger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub kind: String,
    pub target: String,
    pub subject: Option<String>,
    pub body: String,
}

/// Records every send; used by tests and local runs.
pub struct InMemoryMessenger {
    runtime: RuntimeContext,
    available: bool,
    sent: RwLock<Vec<SentMessage>>,
}

impl InMemoryMessenger {
    pub fn new(runtime: RuntimeContext) -> Self {
        Self {
            runtime,
            available: true,
            sent: RwLock::new(Vec::new()),
        }
    }

    pub fn unavailable(runtime: RuntimeContext) -> Self {
        Self {
            available: false,
            ..Self::new(runtime)
        }
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.read().clone()
    }

    fn record(&self, message: SentMessage) -> DeliveryReceipt {
        if !self.available {
            return DeliveryReceipt::undelivered("channel unavailable");
        }
        self.sent.write().push(message);
        DeliveryReceipt::delivered(self.runtime.next_id())
    }
}

#[async_trait]
impl MessageChannel for InMemoryMessenger {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> DeliveryReceipt {
        self.record(SentMessage {
            kind: "email".into(),
            target: to.into(),
            subject: Some(subject.into()),
            body: body.into(),
        })
    }

    async fn send_sms(&self, phone: &str, message: &str) -> DeliveryReceipt {
        self.record(SentMessage {
            kind: "sms".into(),
            target: phone.into(),
            subject: None,
            body: message.into(),
        })
    }

    async fn send_whatsapp(&self, phone: &str, message: &str) -> DeliveryReceipt {
        self.record(SentMessage {
            kind: "whatsapp".into(),
            target: phone.into(),
            subject: None,
            body: message.into(),
        })
    }

    async fn send_chat_message(&self, channel: &str, message: &str) -> DeliveryReceipt {
        self.record(SentMessage {
            kind: "chat".into(),
            target: channel.into(),
            subject: None,
            body: message.into(),
        })
    }

    async fn send_push(&self, user_id: &str, title: &str, message: &str) -> DeliveryReceipt {
        self.record(SentMessage {
            kind: "push".into(),
            target: user_id.into(),
            subject: Some(title.into()),
            body: message.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_records_message() {
        let messenger = InMemoryMessenger::new(RuntimeContext::fake());
        let receipt = messenger.send_email("a@b.co", "Hi", "Hello").await;
        assert!(receipt.sent);
        assert!(receipt.message_id.is_some());
        assert_eq!(messenger.sent_messages().len(), 1);
        assert_eq!(messenger.sent_messages()[0].kind, "email");
    }

    #[tokio::test]
    async fn test_unavailable_channel_degrades() {
        let messenger = InMemoryMessenger::unavailable(RuntimeContext::fake());
        assert!(!messenger.is_available());
        let receipt = messenger.send_sms("+15550100", "hi").await;
        assert!(!receipt.sent);
        assert_eq!(receipt.reason.as_deref(), Some("channel unavailable"));
        assert!(messenger.sent_messages().is_empty());
    }
}
