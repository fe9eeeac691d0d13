//! Scheduled trigger nodes. A schedule is evaluated against the injected
//! clock: a fire time in the future suspends the run, a re-dispatch after
//! the time has passed lets it through. The cron support is the minute and
//! hour fields; day-level fields are treated as wildcards.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use serde_json::json;
use tracing::info;

use crate::engine::NodeHandler;
use crate::error::NodeError;
use crate::model::{ExecutionContext, ExecutionResult, Node};
use crate::runtime::RuntimeContext;
use crate::template;

use super::support;

pub struct ScheduledHandler {
    runtime: RuntimeContext,
}

impl ScheduledHandler {
    pub fn new(runtime: RuntimeContext) -> Self {
        Self { runtime }
    }

    /// Next fire time at or after `from` for a 5 or 6 field cron expression.
    /// A 6 field expression carries a leading seconds field, which is
    /// dropped. Wildcard minute and hour mean the next whole minute.
    fn next_fire(expression: &str, from: DateTime<Utc>) -> Result<DateTime<Utc>, NodeError> {
        let mut fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() == 6 {
            fields.remove(0);
        }
        if fields.len() != 5 {
            return Err(NodeError::ConfigError(format!(
                "invalid cron expression: {expression}"
            )));
        }
        let minute = Self::parse_field(fields[0], 0, 59)?;
        let hour = Self::parse_field(fields[1], 0, 23)?;

        let base = from
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(from);
        // Scan minute by minute; the horizon is one day plus one minute,
        // enough to wrap any hour/minute combination.
        let mut candidate = base + Duration::minutes(1);
        for _ in 0..=(24 * 60) {
            let minute_ok = minute.map(|m| candidate.minute() == m).unwrap_or(true);
            let hour_ok = hour.map(|h| candidate.hour() == h).unwrap_or(true);
            if minute_ok && hour_ok {
                return Ok(candidate);
            }
            candidate += Duration::minutes(1);
        }
        Err(NodeError::ExecutionError(format!(
            "no fire time found for cron: {expression}"
        )))
    }

    fn parse_field(field: &str, min: u32, max: u32) -> Result<Option<u32>, NodeError> {
        if field == "*" || field.starts_with("*/") {
            return Ok(None);
        }
        let value: u32 = field
            .parse()
            .map_err(|_| NodeError::ConfigError(format!("invalid cron field: {field}")))?;
        if value < min || value > max {
            return Err(NodeError::ConfigError(format!(
                "cron field out of range: {field}"
            )));
        }
        Ok(Some(value))
    }

    fn cron_schedule(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let expression = support::require_resolved(node, ctx, "schedule")?;
        let now = self.runtime.now();

        let owned_here = ctx
            .variable("scheduleNodeId")
            .and_then(|v| v.as_str())
            .map(|id| id == node.id)
            .unwrap_or(false);
        let pending = if owned_here {
            ctx.variable("nextFireAt")
                .and_then(|v| v.as_str())
                .and_then(support::parse_datetime)
        } else {
            None
        };

        match pending {
            Some(at) if now >= at => {
                ctx.variables.remove("nextFireAt");
                ctx.variables.remove("scheduleNodeId");
                let mut output = BTreeMap::new();
                output.insert("triggered".into(), json!(true));
                output.insert("firedAt".into(), json!(now.to_rfc3339()));
                Ok(ExecutionResult::success_with(output))
            }
            Some(at) => Ok(ExecutionResult::paused(format!(
                "Scheduled for {}",
                at.to_rfc3339()
            ))),
            None => {
                let at = Self::next_fire(&expression, now)?;
                ctx.set_variable("nextFireAt", json!(at.to_rfc3339()));
                ctx.set_variable("scheduleNodeId", json!(node.id));
                info!(node_id = %node.id, fire_at = %at, "schedule computed");
                Ok(ExecutionResult::paused(format!(
                    "Scheduled for {}",
                    at.to_rfc3339()
                )))
            }
        }
    }

    /// Trigger relative to a date field on the record, e.g. 7 days before a
    /// renewal date. The run proceeds once the offset date has arrived.
    fn date_based(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let field = node
            .config_str("dateField")
            .ok_or_else(|| NodeError::ConfigError("missing required field: dateField".into()))?;
        let raw = template::resolve_path(field, &ctx.variables)
            .cloned()
            .or_else(|| ctx.trigger_data.get(field).cloned());
        let Some(raw) = raw else {
            return Ok(ExecutionResult::failed(format!(
                "date field not found: {field}"
            )));
        };
        let base = raw
            .as_str()
            .and_then(support::parse_datetime)
            .ok_or_else(|| NodeError::TypeError(format!("unparseable date in {field}: {raw}")))?;

        let offset_days = node.config_i64("offset").unwrap_or(0);
        let before = node
            .config_str("offsetType")
            .map(|t| t.eq_ignore_ascii_case("before"))
            .unwrap_or(true);
        let fire_at = if before {
            base - Duration::days(offset_days)
        } else {
            base + Duration::days(offset_days)
        };

        let now = self.runtime.now();
        let mut output = BTreeMap::new();
        output.insert("baseDate".into(), json!(base.to_rfc3339()));
        output.insert("triggerDate".into(), json!(fire_at.to_rfc3339()));
        if now >= fire_at {
            output.insert("triggered".into(), json!(true));
            Ok(ExecutionResult::success_with(output))
        } else {
            Ok(ExecutionResult::paused(format!(
                "Scheduled for {}",
                fire_at.to_rfc3339()
            )))
        }
    }
}

#[async_trait]
impl NodeHandler for ScheduledHandler {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        match node.subtype.as_str() {
            "scheduled" | "recurring" => self.cron_schedule(node, ctx),
            "date_based" => self.date_based(node, ctx),
            other => Err(NodeError::UnknownSubtype {
                node_type: node.node_type.to_string(),
                subtype: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::model::{NodeType, ResultStatus};
    use crate::runtime::{FakeIdGenerator, FakeTimeProvider};

    use super::*;

    fn clocked_runtime() -> (RuntimeContext, Arc<FakeTimeProvider>) {
        // 2024-03-15 12:00:00 UTC.
        let time = Arc::new(FakeTimeProvider::new(1_710_504_000));
        let runtime = RuntimeContext {
            time_provider: time.clone(),
            id_generator: Arc::new(FakeIdGenerator::new("id")),
        };
        (runtime, time)
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("wf-1", 1, "ex-1", "acme", json!({}))
    }

    #[test]
    fn test_next_fire_respects_hour_and_minute() {
        let now = Utc::now()
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap();
        let fire = ScheduledHandler::next_fire("30 9 * * *", now).unwrap();
        assert_eq!(fire.minute(), 30);
        assert_eq!(fire.hour(), 9);
        assert!(fire > now);
    }

    #[test]
    fn test_wildcard_cron_fires_next_minute() {
        let now = Utc::now();
        let fire = ScheduledHandler::next_fire("* * * * *", now).unwrap();
        assert!(fire > now);
        assert!(fire <= now + Duration::minutes(2));
    }

    #[test]
    fn test_malformed_cron_is_config_error() {
        let err = ScheduledHandler::next_fire("whenever", Utc::now()).unwrap_err();
        assert!(matches!(err, NodeError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_scheduled_suspends_then_fires() {
        let (runtime, time) = clocked_runtime();
        let handler = ScheduledHandler::new(runtime);
        let node = Node::new("s1", NodeType::Scheduled, "scheduled")
            .with_config(json!({"schedule": "0 13 * * *"}));
        let mut ctx = ctx();

        let first = handler.execute(&node, &mut ctx).await.unwrap();
        assert_eq!(first.status, ResultStatus::Paused);
        assert!(ctx.variable("nextFireAt").is_some());

        time.advance_secs(2 * 3600);
        let second = handler.execute(&node, &mut ctx).await.unwrap();
        assert!(second.is_success());
        assert_eq!(second.output["triggered"], json!(true));
        assert!(ctx.variable("nextFireAt").is_none());
    }

    #[tokio::test]
    async fn test_date_based_before_offset() {
        let (runtime, _) = clocked_runtime();
        let handler = ScheduledHandler::new(runtime);
        let node = Node::new("s1", NodeType::Scheduled, "date_based").with_config(json!({
            "dateField": "renewalDate",
            "offset": 7,
            "offsetType": "before"
        }));

        // Renewal five days out: the 7-days-before point is already past.
        let mut ctx = ctx();
        ctx.set_variable("renewalDate", json!("2024-03-20"));
        let due = handler.execute(&node, &mut ctx).await.unwrap();
        assert!(due.is_success());

        // Renewal far in the future: still waiting.
        ctx.set_variable("renewalDate", json!("2024-06-01"));
        let pending = handler.execute(&node, &mut ctx).await.unwrap();
        assert_eq!(pending.status, ResultStatus::Paused);
    }

    #[tokio::test]
    async fn test_date_based_missing_field_fails() {
        let (runtime, _) = clocked_runtime();
        let handler = ScheduledHandler::new(runtime);
        let node = Node::new("s1", NodeType::Scheduled, "date_based")
            .with_config(json!({"dateField": "renewalDate"}));

        let result = handler.execute(&node, &mut ctx()).await.unwrap();
        assert!(!result.is_success());
    }
}
