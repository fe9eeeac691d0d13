mod node_error;
mod workflow_error;

pub use node_error::NodeError;
pub use workflow_error::WorkflowError;

pub type WorkflowResult<T> = Result<T, WorkflowError>;
