//! Outbound messaging. Unavailable channels degrade to a SUCCESS result
//! with `sent: false`; a node never fails the run because a transport is
//! unconfigured.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::engine::NodeHandler;
use crate::error::NodeError;
use crate::model::{ExecutionContext, ExecutionResult, Node};
use crate::services::{DeliveryReceipt, MessageChannel, NotificationSink};

use super::support;

pub struct CommunicationHandler {
    channel: Arc<dyn MessageChannel>,
    notifications: Arc<dyn NotificationSink>,
}

impl CommunicationHandler {
    pub fn new(channel: Arc<dyn MessageChannel>, notifications: Arc<dyn NotificationSink>) -> Self {
        Self {
            channel,
            notifications,
        }
    }

    fn unavailable(&self, kind: &str) -> ExecutionResult {
        warn!(kind, "message channel unavailable, skipping send");
        let mut output = BTreeMap::new();
        output.insert("sent".into(), json!(false));
        output.insert("reason".into(), json!("channel not configured"));
        ExecutionResult::success_with(output)
    }

    fn delivery_output(receipt: DeliveryReceipt, extra: &[(&str, serde_json::Value)]) -> ExecutionResult {
        let mut output = BTreeMap::new();
        output.insert("sent".into(), json!(receipt.sent));
        if let Some(id) = receipt.message_id {
            output.insert("messageId".into(), json!(id));
        }
        if let Some(reason) = receipt.reason {
            output.insert("reason".into(), json!(reason));
        }
        for (key, value) in extra {
            output.insert((*key).into(), value.clone());
        }
        ExecutionResult::success_with(output)
    }

    async fn email(&self, node: &Node, ctx: &ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let to = support::require_resolved(node, ctx, "to")?;
        let subject = support::resolved(node, ctx, "subject").unwrap_or_default();
        let body = self.email_body(node, ctx);

        if !self.channel.is_available() {
            return Ok(self.unavailable("email"));
        }
        let receipt = self.channel.send_email(&to, &subject, &body).await;
        info!(to, sent = receipt.sent, "email dispatched");
        Ok(Self::delivery_output(receipt, &[("to", json!(to))]))
    }

    async fn bulk_email(&self, node: &Node, ctx: &ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let recipients = node
            .config
            .get("recipients")
            .map(support::string_items)
            .unwrap_or_default();
        let subject = support::resolved(node, ctx, "subject").unwrap_or_default();
        let body = self.email_body(node, ctx);

        if !self.channel.is_available() {
            return Ok(self.unavailable("email"));
        }
        let mut sent = 0;
        for to in &recipients {
            if self.channel.send_email(to, &subject, &body).await.sent {
                sent += 1;
            }
        }
        let mut output = BTreeMap::new();
        output.insert("sent".into(), json!(sent > 0));
        output.insert("emailsSent".into(), json!(sent));
        output.insert("recipientCount".into(), json!(recipients.len()));
        Ok(ExecutionResult::success_with(output))
    }

    /// Inline body wins; otherwise the template reference is rendered with
    /// the node's variable overlay. Template storage is a collaborator
    /// concern, so the reference is passed through symbolically.
    fn email_body(&self, node: &Node, ctx: &ExecutionContext) -> String {
        if let Some(body) = support::resolved(node, ctx, "body") {
            return body;
        }
        if let Some(template) = support::resolved(node, ctx, "template") {
            return template;
        }
        node.config_str("templateId")
            .map(|id| format!("template:{id}"))
            .unwrap_or_default()
    }

    async fn sms_or_whatsapp(&self, node: &Node, ctx: &ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let phone = support::require_resolved(node, ctx, "phoneNumber")?;
        let message = support::resolved(node, ctx, "message").unwrap_or_default();

        if !self.channel.is_available() {
            return Ok(self.unavailable(&node.subtype));
        }
        let receipt = if node.subtype == "send_whatsapp" {
            self.channel.send_whatsapp(&phone, &message).await
        } else {
            self.channel.send_sms(&phone, &message).await
        };
        Ok(Self::delivery_output(receipt, &[("phoneNumber", json!(phone))]))
    }

    async fn notification(&self, node: &Node, ctx: &ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let title = support::resolved(node, ctx, "title").unwrap_or_default();
        let message = support::resolved(node, ctx, "message").unwrap_or_default();
        let user_ids: Vec<String> = match node.config.get("userIds") {
            Some(list) => support::string_items(list),
            None => support::resolved(node, ctx, "userId").into_iter().collect(),
        };
        if user_ids.is_empty() {
            return Err(NodeError::ConfigError(
                "notification requires userId or userIds".into(),
            ));
        }

        if node.subtype == "push_notification" {
            if !self.channel.is_available() {
                return Ok(self.unavailable("push"));
            }
            let mut sent = 0;
            for user in &user_ids {
                if self.channel.send_push(user, &title, &message).await.sent {
                    sent += 1;
                }
            }
            let mut output = BTreeMap::new();
            output.insert("sent".into(), json!(sent > 0));
            output.insert("notified".into(), json!(sent));
            return Ok(ExecutionResult::success_with(output));
        }

        self.notifications.notify(&user_ids, &title, &message).await;
        let mut output = BTreeMap::new();
        output.insert("sent".into(), json!(true));
        output.insert("notified".into(), json!(user_ids.len()));
        Ok(ExecutionResult::success_with(output))
    }

    async fn chat(&self, node: &Node, ctx: &ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let channel = support::require_resolved(node, ctx, "channel")?;
        let message = support::require_resolved(node, ctx, "message")?;

        if !self.channel.is_available() {
            return Ok(self.unavailable("chat"));
        }
        let receipt = self.channel.send_chat_message(&channel, &message).await;
        Ok(Self::delivery_output(receipt, &[("channel", json!(channel))]))
    }
}

#[async_trait]
impl NodeHandler for CommunicationHandler {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        match node.subtype.as_str() {
            "send_email" | "send_template_email" => self.email(node, ctx).await,
            "send_bulk_email" => self.bulk_email(node, ctx).await,
            "send_sms" | "send_whatsapp" => self.sms_or_whatsapp(node, ctx).await,
            "send_notification" | "internal_notification" | "push_notification" => {
                self.notification(node, ctx).await
            }
            "post_to_chat" | "slack_message" => self.chat(node, ctx).await,
            other => Err(NodeError::UnknownSubtype {
                node_type: node.node_type.to_string(),
                subtype: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::model::NodeType;
    use crate::runtime::RuntimeContext;
    use crate::services::{InMemoryMessenger, InMemoryNotificationSink};

    use super::*;

    fn handler_with(messenger: Arc<InMemoryMessenger>) -> (CommunicationHandler, Arc<InMemoryNotificationSink>) {
        let sink = Arc::new(InMemoryNotificationSink::new());
        (CommunicationHandler::new(messenger, sink.clone()), sink)
    }

    fn ctx() -> ExecutionContext {
        let mut ctx = ExecutionContext::new("wf-1", 1, "ex-1", "acme", json!({}));
        ctx.set_variable("lead", json!({"email": "ann@example.com", "name": "Ann"}));
        ctx
    }

    #[tokio::test]
    async fn test_send_email_resolves_templates() {
        let messenger = Arc::new(InMemoryMessenger::new(RuntimeContext::fake()));
        let (handler, _) = handler_with(messenger.clone());
        let node = Node::new("m1", NodeType::Communication, "send_email").with_config(json!({
            "to": "{{lead.email}}",
            "subject": "Welcome {{lead.name}}",
            "body": "Hello!"
        }));

        let result = handler.execute(&node, &mut ctx()).await.unwrap();
        assert_eq!(result.output["sent"], json!(true));
        let sent = messenger.sent_messages();
        assert_eq!(sent[0].target, "ann@example.com");
        assert_eq!(sent[0].subject.as_deref(), Some("Welcome Ann"));
    }

    #[tokio::test]
    async fn test_unavailable_channel_degrades_to_unsent_success() {
        let messenger = Arc::new(InMemoryMessenger::unavailable(RuntimeContext::fake()));
        let (handler, _) = handler_with(messenger);
        let node = Node::new("m1", NodeType::Communication, "send_sms")
            .with_config(json!({"phoneNumber": "+15550100", "message": "hi"}));

        let result = handler.execute(&node, &mut ctx()).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.output["sent"], json!(false));
    }

    #[tokio::test]
    async fn test_internal_notification_uses_sink() {
        let messenger = Arc::new(InMemoryMessenger::new(RuntimeContext::fake()));
        let (handler, sink) = handler_with(messenger);
        let node = Node::new("m1", NodeType::Communication, "send_notification").with_config(
            json!({"userIds": ["u1", "u2"], "title": "Heads up", "message": "New lead"}),
        );

        let result = handler.execute(&node, &mut ctx()).await.unwrap();
        assert_eq!(result.output["notified"], json!(2));
        assert_eq!(sink.delivered().len(), 2);
    }

    #[tokio::test]
    async fn test_bulk_email_counts_recipients() {
        let messenger = Arc::new(InMemoryMessenger::new(RuntimeContext::fake()));
        let (handler, _) = handler_with(messenger.clone());
        let node = Node::new("m1", NodeType::Communication, "send_bulk_email").with_config(json!({
            "recipients": ["a@x.com", "b@x.com"],
            "subject": "News",
            "templateId": "digest"
        }));

        let result = handler.execute(&node, &mut ctx()).await.unwrap();
        assert_eq!(result.output["emailsSent"], json!(2));
        assert_eq!(messenger.sent_messages().len(), 2);
    }
}
