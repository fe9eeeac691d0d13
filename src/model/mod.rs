//! Shared data model: workflow graphs, execution state, approval requests.

mod approval;
mod execution;
mod workflow;

pub use approval::{
    ApprovalComment, ApprovalDecision, ApprovalRequest, ApprovalStatus, ApprovalType,
};
pub use execution::{
    ExecutedNode, ExecutionContext, ExecutionResult, ExecutionStatus, LogEntry, LogLevel,
    ResultStatus, OUTCOME_DEFAULT,
};
pub use workflow::{Node, NodeType, Workflow, WorkflowGraph};
