//! Error-path nodes: handle a recorded error, count retries, or stop the
//! run outright.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::engine::NodeHandler;
use crate::error::NodeError;
use crate::model::{ExecutionContext, ExecutionResult, Node};

use super::support;

const DEFAULT_MAX_RETRIES: i64 = 3;
const DEFAULT_RETRY_DELAY_SECS: i64 = 60;

pub struct ErrorHandler;

impl ErrorHandler {
    fn handle_error(node: &Node, ctx: &ExecutionContext) -> ExecutionResult {
        let last_error = ctx
            .variable("lastError")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let action = node.config_str("action").unwrap_or("LOG");
        info!(last_error, action, "error handled");

        let mut output = BTreeMap::new();
        output.insert("errorHandled".into(), json!(true));
        output.insert("action".into(), json!(action));
        ExecutionResult::success_with(output)
    }

    /// Retry count lives in the variables so it survives suspensions. Each
    /// pass through this node increments it until the cap.
    fn retry(node: &Node, ctx: &mut ExecutionContext) -> ExecutionResult {
        let max_retries = node.config_i64("maxRetries").unwrap_or(DEFAULT_MAX_RETRIES);
        let retry_delay = node
            .config_i64("retryDelay")
            .unwrap_or(DEFAULT_RETRY_DELAY_SECS);
        let current = ctx
            .variable("retryCount")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        if current >= max_retries {
            warn!(max_retries, "max retries exceeded");
            return ExecutionResult::failed("Max retries exceeded");
        }

        info!(attempt = current + 1, max_retries, "retrying");
        ctx.set_variable("retryCount", json!(current + 1));

        let mut output = BTreeMap::new();
        output.insert("retrying".into(), json!(true));
        output.insert("retryCount".into(), json!(current + 1));
        output.insert("retryDelay".into(), json!(retry_delay));
        ExecutionResult::success_with(output)
    }

    fn stop(node: &Node, ctx: &ExecutionContext) -> ExecutionResult {
        let reason =
            support::resolved(node, ctx, "reason").unwrap_or_else(|| "unspecified".to_string());
        info!(reason, "workflow stopped by node");
        ExecutionResult::failed(format!("Workflow stopped: {reason}"))
    }
}

#[async_trait]
impl NodeHandler for ErrorHandler {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        match node.subtype.as_str() {
            "error_handler" => Ok(Self::handle_error(node, ctx)),
            "retry_on_failure" => Ok(Self::retry(node, ctx)),
            "stop_workflow" => Ok(Self::stop(node, ctx)),
            other => Err(NodeError::UnknownSubtype {
                node_type: node.node_type.to_string(),
                subtype: other.to_string(),
            }),
        }
    }
}
