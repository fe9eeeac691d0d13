//! Approval nodes. First dispatch creates an [`ApprovalRequest`] and
//! suspends the run; the resume dispatch reads the resolution signal left
//! in the variables by the orchestrator and branches approved/rejected.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::approval::ApprovalOrchestrator;
use crate::engine::NodeHandler;
use crate::error::NodeError;
use crate::model::{ApprovalType, ExecutionContext, ExecutionResult, Node};

use super::support;

pub struct ApprovalHandler {
    approvals: Arc<ApprovalOrchestrator>,
}

impl ApprovalHandler {
    pub fn new(approvals: Arc<ApprovalOrchestrator>) -> Self {
        Self { approvals }
    }

    /// The resolution signal only belongs to this node when the request was
    /// created here. Signals left over from an earlier approval node in the
    /// same run must not short-circuit a later one.
    fn resolution(node: &Node, ctx: &ExecutionContext) -> Option<String> {
        let owner = ctx.variable("approvalNodeId")?.as_str()?;
        if owner != node.id {
            return None;
        }
        match ctx.variable("approvalStatus")?.as_str()? {
            "approved" => Some("approved".to_string()),
            "rejected" => Some("rejected".to_string()),
            _ => None,
        }
    }

    fn request_data(node: &Node, ctx: &ExecutionContext) -> Value {
        let mut data = support::resolved_map(node, ctx, "requestData")
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_else(Map::new);
        for key in ["title", "message"] {
            if let Some(text) = support::resolved(node, ctx, key) {
                data.insert(key.to_string(), json!(text));
            }
        }
        Value::Object(data)
    }

    fn approvers(node: &Node, key: &str) -> Result<Vec<String>, NodeError> {
        let list = node
            .config
            .get(key)
            .map(support::string_items)
            .unwrap_or_default();
        if list.is_empty() {
            return Err(NodeError::ConfigError(format!(
                "missing required field: {key}"
            )));
        }
        Ok(list)
    }

    async fn create(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let data = Self::request_data(node, ctx);
        let request = match node.subtype.as_str() {
            "approval_step" => {
                let approvers = Self::approvers(node, "approvers")?;
                self.approvals
                    .create(
                        &ctx.execution_id,
                        &node.id,
                        ApprovalType::Single,
                        approvers,
                        data,
                    )
                    .await
            }
            "review_process" => {
                let reviewers = Self::approvers(node, "reviewers")
                    .or_else(|_| Self::approvers(node, "approvers"))?;
                self.approvals
                    .create(
                        &ctx.execution_id,
                        &node.id,
                        ApprovalType::Review,
                        reviewers,
                        data,
                    )
                    .await
            }
            "multi_step_approval" => {
                let steps: Vec<Vec<String>> = node
                    .config
                    .get("steps")
                    .and_then(Value::as_array)
                    .map(|rows| rows.iter().map(support::string_items).collect())
                    .unwrap_or_default();
                if steps.is_empty() || steps.iter().any(Vec::is_empty) {
                    return Err(NodeError::ConfigError(
                        "multi_step_approval requires non-empty steps".into(),
                    ));
                }
                self.approvals
                    .create_multi_step(&ctx.execution_id, &node.id, steps, data)
                    .await
            }
            "parallel_approval" => {
                let approvers = Self::approvers(node, "approvers")?;
                let required = node
                    .config_i64("requiredApprovals")
                    .map(|n| n.max(0) as usize)
                    .unwrap_or(approvers.len());
                self.approvals
                    .create_parallel(&ctx.execution_id, &node.id, approvers, required, data)
                    .await
            }
            other => {
                return Err(NodeError::UnknownSubtype {
                    node_type: node.node_type.to_string(),
                    subtype: other.to_string(),
                })
            }
        };

        info!(approval_id = %request.id, node_id = %node.id, "run suspended on approval");
        ctx.set_variable("approvalId", json!(request.id));
        ctx.set_variable("approvalNodeId", json!(node.id));

        let mut result = ExecutionResult::waiting("Waiting for approval");
        result
            .output
            .insert("approvalId".into(), json!(request.id));
        result.output.insert("status".into(), json!("PENDING"));
        Ok(result)
    }
}

#[async_trait]
impl NodeHandler for ApprovalHandler {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        if let Some(signal) = Self::resolution(node, ctx) {
            ctx.variables.remove("approvalStatus");
            ctx.variables.remove("approvalNodeId");
            let mut output = BTreeMap::new();
            output.insert("approved".into(), json!(signal == "approved"));
            if let Some(id) = ctx.variable("approvalId").cloned() {
                output.insert("approvalId".into(), id);
            }
            return Ok(ExecutionResult::branch(signal, output));
        }
        self.create(node, ctx).await
    }
}
