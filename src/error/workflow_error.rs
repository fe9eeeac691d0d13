//! Engine-level error types.
//!
//! These are the errors that surface to the caller of `start`/`resume` as
//! hard failures: infrastructure problems and graph-integrity violations, as
//! opposed to business-logic FAILED outcomes which are recorded against the
//! execution and returned as an ordinary context.

use super::NodeError;
use thiserror::Error;

/// Engine-fatal errors.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),
    #[error("Workflow is not active: {0}")]
    WorkflowInactive(String),
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),
    #[error("Execution {execution_id} is not resumable from status {status}")]
    NotResumable {
        execution_id: String,
        status: String,
    },
    #[error("Node not found in graph: {0}")]
    NodeNotFound(String),
    #[error("No trigger node found")]
    NoTriggerNode,
    #[error("Multiple trigger nodes found")]
    MultipleTriggerNodes,
    #[error("Max steps exceeded: {0}")]
    MaxStepsExceeded(u32),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Node error: {0}")]
    NodeError(Box<NodeError>),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<NodeError> for WorkflowError {
    fn from(value: NodeError) -> Self {
        WorkflowError::NodeError(Box::new(value))
    }
}
