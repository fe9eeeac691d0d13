//! Live execution state and the handler result protocol.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Persisted status of one workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Paused,
    Cancelled,
    WaitingApproval,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn is_suspended(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Paused | ExecutionStatus::WaitingApproval
        )
    }
}

/// Append-only audit trail entry: one completed node dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedNode {
    pub node_id: String,
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
}

/// The live run state. The engine exclusively owns the lifecycle; handlers
/// may only mutate `variables` and read everything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub workflow_version: u32,
    pub execution_id: String,
    pub tenant_id: String,
    /// The shared mutable scope for the whole run.
    pub variables: BTreeMap<String, Value>,
    pub executed_nodes: Vec<ExecutedNode>,
    /// Resumption pointer. While suspended it points at the paused node, not
    /// its successor.
    pub current_node_id: Option<String>,
    /// The payload that started the run. Read-only.
    pub trigger_data: Value,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ExecutionContext {
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_version: u32,
        execution_id: impl Into<String>,
        tenant_id: impl Into<String>,
        trigger_data: Value,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_version,
            execution_id: execution_id.into(),
            tenant_id: tenant_id.into(),
            variables: BTreeMap::new(),
            executed_nodes: Vec::new(),
            current_node_id: None,
            trigger_data,
            error_message: None,
        }
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    pub fn record_node(&mut self, node_id: &str, outcome: &str, timestamp: DateTime<Utc>) {
        self.executed_nodes.push(ExecutedNode {
            node_id: node_id.to_string(),
            outcome: outcome.to_string(),
            timestamp,
        });
    }
}

/// The four result states a handler can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Success,
    Failed,
    Paused,
    /// Equivalent to `Paused`, reserved for event-based suspension.
    Waiting,
}

/// The default outcome key for nodes with no explicit branch signal.
pub const OUTCOME_DEFAULT: &str = "default";

/// What a handler returns to the engine for one node dispatch.
///
/// Only `Success` carries an outcome used to pick the next edge; the other
/// states stop traversal for this execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ResultStatus,
    /// Edge-selection key, meaningful only when `status == Success`.
    pub outcome: String,
    /// Output mapping merged into `variables` on success.
    #[serde(default)]
    pub output: BTreeMap<String, Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Human-readable reason for a suspension.
    #[serde(default)]
    pub pause_reason: Option<String>,
}

impl ExecutionResult {
    pub fn success() -> Self {
        Self {
            status: ResultStatus::Success,
            outcome: OUTCOME_DEFAULT.to_string(),
            output: BTreeMap::new(),
            error_message: None,
            pause_reason: None,
        }
    }

    pub fn success_with(output: BTreeMap<String, Value>) -> Self {
        Self {
            output,
            ..Self::success()
        }
    }

    /// Success that selects a named outgoing edge.
    pub fn branch(outcome: impl Into<String>, output: BTreeMap<String, Value>) -> Self {
        Self {
            outcome: outcome.into(),
            output,
            ..Self::success()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Failed,
            outcome: OUTCOME_DEFAULT.to_string(),
            output: BTreeMap::new(),
            error_message: Some(message.into()),
            pause_reason: None,
        }
    }

    pub fn paused(reason: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Paused,
            outcome: OUTCOME_DEFAULT.to_string(),
            output: BTreeMap::new(),
            error_message: None,
            pause_reason: Some(reason.into()),
        }
    }

    pub fn waiting(reason: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Waiting,
            ..Self::paused(reason)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

/// One append-only execution log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_constructors() {
        let ok = ExecutionResult::success();
        assert!(ok.is_success());
        assert_eq!(ok.outcome, OUTCOME_DEFAULT);

        let branched = ExecutionResult::branch("true", BTreeMap::new());
        assert!(branched.is_success());
        assert_eq!(branched.outcome, "true");

        let failed = ExecutionResult::failed("boom");
        assert_eq!(failed.status, ResultStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));

        let paused = ExecutionResult::paused("waiting for approval");
        assert_eq!(paused.status, ResultStatus::Paused);
        assert!(!paused.is_success());

        let waiting = ExecutionResult::waiting("waiting for event");
        assert_eq!(waiting.status, ResultStatus::Waiting);
    }

    #[test]
    fn test_context_roundtrip() {
        let mut ctx = ExecutionContext::new("wf-1", 3, "ex-1", "acme", json!({"id": 7}));
        ctx.set_variable("lead", json!({"name": "Ann"}));
        ctx.current_node_id = Some("n2".into());

        let encoded = serde_json::to_string(&ctx).unwrap();
        let decoded: ExecutionContext = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.workflow_version, 3);
        assert_eq!(decoded.current_node_id.as_deref(), Some("n2"));
        assert_eq!(decoded.variable("lead"), Some(&json!({"name": "Ann"})));
    }

    #[test]
    fn test_status_predicates() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
        assert!(ExecutionStatus::Paused.is_suspended());
        assert!(ExecutionStatus::WaitingApproval.is_suspended());
        assert!(!ExecutionStatus::Running.is_suspended());
    }
}
