//! Event trigger nodes. An event node matches the incoming payload against
//! its configured discriminator (button id, form id, tag, ...); a payload
//! for a different source leaves the run WAITING instead of proceeding.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::engine::NodeHandler;
use crate::error::NodeError;
use crate::model::{ExecutionContext, ExecutionResult, Node};

pub struct EventHandler;

impl EventHandler {
    /// Discriminator config keys per subtype. The payload matches when
    /// every configured key equals the corresponding payload field;
    /// unconfigured keys match anything.
    fn discriminators(subtype: &str) -> &'static [&'static str] {
        match subtype {
            "button_click" => &["buttonId"],
            "form_submit" => &["formId"],
            "email_opened" | "email_clicked" | "email_replied" => &["emailId", "campaignId"],
            "page_viewed" => &["pageUrl"],
            "added_to_list" | "removed_from_list" => &["listId"],
            "tag_added" | "tag_removed" => &["tag"],
            // Enrollment and ownership events carry no source filter.
            _ => &[],
        }
    }

    fn matches(node: &Node, payload: &Value) -> bool {
        Self::discriminators(&node.subtype).iter().all(|key| {
            match (node.config.get(*key), payload.get(*key)) {
                (None, _) => true,
                (Some(Value::Null), _) => true,
                (Some(wanted), Some(actual)) => wanted == actual,
                (Some(_), None) => false,
            }
        })
    }
}

#[async_trait]
impl NodeHandler for EventHandler {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        const KNOWN: [&str; 13] = [
            "button_click",
            "form_submit",
            "manual_enrollment",
            "email_opened",
            "email_clicked",
            "email_replied",
            "page_viewed",
            "record_assigned",
            "owner_changed",
            "added_to_list",
            "removed_from_list",
            "tag_added",
            "tag_removed",
        ];
        if !KNOWN.contains(&node.subtype.as_str()) {
            return Err(NodeError::UnknownSubtype {
                node_type: node.node_type.to_string(),
                subtype: node.subtype.clone(),
            });
        }

        if !Self::matches(node, &ctx.trigger_data) {
            return Ok(ExecutionResult::waiting(format!(
                "Waiting for {} event",
                node.subtype
            )));
        }

        let seeded: Vec<(String, Value)> = ctx
            .trigger_data
            .as_object()
            .map(|payload| {
                payload
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        for (key, value) in seeded {
            ctx.set_variable(key, value);
        }
        ctx.set_variable("eventType", json!(node.subtype));
        info!(subtype = %node.subtype, "event trigger matched");

        let mut output = BTreeMap::new();
        output.insert("triggered".into(), json!(true));
        output.insert("eventType".into(), json!(node.subtype));
        Ok(ExecutionResult::success_with(output))
    }
}
