//! Wait nodes. A suspension holds no engine resources: the resume moment
//! is written into the variables and every re-dispatch just compares it
//! against the clock.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Duration;
use serde_json::json;
use tracing::info;

use crate::engine::NodeHandler;
use crate::error::NodeError;
use crate::model::{ExecutionContext, ExecutionResult, Node};
use crate::runtime::RuntimeContext;

use super::support;

pub struct DelayHandler {
    runtime: RuntimeContext,
}

impl DelayHandler {
    pub fn new(runtime: RuntimeContext) -> Self {
        Self { runtime }
    }

    fn duration(node: &Node) -> Result<Duration, NodeError> {
        let amount = node
            .config_i64("duration")
            .ok_or_else(|| NodeError::ConfigError("missing required field: duration".into()))?;
        let unit = node.config_str("unit").unwrap_or("MINUTES");
        let duration = match unit.to_ascii_uppercase().as_str() {
            "MINUTES" => Duration::minutes(amount),
            "HOURS" => Duration::hours(amount),
            "DAYS" => Duration::days(amount),
            "WEEKS" => Duration::weeks(amount),
            other => {
                return Err(NodeError::ConfigError(format!(
                    "unknown duration unit: {other}"
                )))
            }
        };
        Ok(duration)
    }

    fn wait_duration(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let now = self.runtime.now();
        let owned_here = ctx
            .variable("delayNodeId")
            .and_then(|v| v.as_str())
            .map(|id| id == node.id)
            .unwrap_or(false);
        let resume_at = if owned_here {
            ctx.variable("resumeAt")
                .and_then(|v| v.as_str())
                .and_then(support::parse_datetime)
        } else {
            None
        };

        match resume_at {
            Some(at) if now >= at => {
                ctx.variables.remove("resumeAt");
                ctx.variables.remove("delayNodeId");
                let mut output = BTreeMap::new();
                output.insert("waited".into(), json!(true));
                Ok(ExecutionResult::success_with(output))
            }
            Some(at) => Ok(ExecutionResult::paused(format!(
                "Waiting until {}",
                at.to_rfc3339()
            ))),
            None => {
                let at = now + Self::duration(node)?;
                ctx.set_variable("resumeAt", json!(at.to_rfc3339()));
                ctx.set_variable("delayNodeId", json!(node.id));
                info!(node_id = %node.id, resume_at = %at, "run suspended on delay");
                Ok(ExecutionResult::paused(format!(
                    "Waiting until {}",
                    at.to_rfc3339()
                )))
            }
        }
    }

    fn wait_until_date(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let raw = support::require_resolved(node, ctx, "targetDate")?;
        let target = support::parse_datetime(&raw)
            .ok_or_else(|| NodeError::ConfigError(format!("unparseable targetDate: {raw}")))?;
        if self.runtime.now() >= target {
            let mut output = BTreeMap::new();
            output.insert("waited".into(), json!(true));
            output.insert("targetDate".into(), json!(raw));
            Ok(ExecutionResult::success_with(output))
        } else {
            Ok(ExecutionResult::paused(format!("Waiting until {raw}")))
        }
    }

    fn wait_for_event(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let event_type = support::require_resolved(node, ctx, "eventType")?;
        let received = ctx
            .variable("receivedEvent")
            .and_then(|v| v.as_str())
            .map(|e| e == event_type)
            .unwrap_or(false);
        if received {
            ctx.variables.remove("receivedEvent");
            ctx.variables.remove("waitingForEvent");
            let mut output = BTreeMap::new();
            output.insert("eventReceived".into(), json!(true));
            output.insert("eventType".into(), json!(event_type));
            return Ok(ExecutionResult::success_with(output));
        }
        ctx.set_variable("waitingForEvent", json!(event_type));
        Ok(ExecutionResult::waiting(format!(
            "Waiting for event {event_type}"
        )))
    }

    fn schedule_action(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let schedule_time = support::require_resolved(node, ctx, "scheduleTime")?;
        let action = support::resolved(node, ctx, "action").unwrap_or_default();
        let mut output = BTreeMap::new();
        output.insert("scheduled".into(), json!(true));
        output.insert("scheduleTime".into(), json!(schedule_time));
        output.insert("action".into(), json!(action));
        Ok(ExecutionResult::success_with(output))
    }
}

#[async_trait]
impl NodeHandler for DelayHandler {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        match node.subtype.as_str() {
            "wait_duration" => self.wait_duration(node, ctx),
            "wait_until_date" => self.wait_until_date(node, ctx),
            "wait_for_event" => self.wait_for_event(node, ctx),
            "schedule_action" => self.schedule_action(node, ctx),
            other => Err(NodeError::UnknownSubtype {
                node_type: node.node_type.to_string(),
                subtype: other.to_string(),
            }),
        }
    }
}
