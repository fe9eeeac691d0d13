//! Record-lifecycle triggers. By the time the engine dispatches one the
//! trigger has already fired; the handler seeds the variable scope from the
//! trigger payload and passes through.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::engine::NodeHandler;
use crate::error::NodeError;
use crate::model::{ExecutionContext, ExecutionResult, Node};

pub struct TriggerHandler;

#[async_trait]
impl NodeHandler for TriggerHandler {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        match node.subtype.as_str() {
            "record_created" | "record_updated" | "record_deleted" | "field_changed"
            | "status_changed" | "stage_changed" => {}
            other => {
                return Err(NodeError::UnknownSubtype {
                    node_type: node.node_type.to_string(),
                    subtype: other.to_string(),
                })
            }
        }

        if let Some(payload) = ctx.trigger_data.as_object() {
            let seeded: Vec<_> = payload.clone().into_iter().collect();
            for (key, value) in seeded {
                ctx.set_variable(key, value);
            }
        }
        ctx.set_variable("triggerType", json!(node.subtype));
        if let Some(field) = node.config_str("field") {
            ctx.set_variable("triggerField", json!(field));
        }

        debug!(subtype = %node.subtype, "trigger node passed through");
        Ok(ExecutionResult::success())
    }
}
