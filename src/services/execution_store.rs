//! Execution state persistence.
//!
//! A suspended execution is fully represented by its saved context; the
//! engine reloads it on resume. Store failures are engine-fatal.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{WorkflowError, WorkflowResult};
use crate::model::{ExecutionContext, ExecutionStatus, LogEntry};

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn save(&self, context: &ExecutionContext, status: ExecutionStatus)
        -> WorkflowResult<()>;

    async fn load(&self, execution_id: &str)
        -> WorkflowResult<(ExecutionContext, ExecutionStatus)>;

    async fn status(&self, execution_id: &str) -> WorkflowResult<ExecutionStatus>;

    async fn set_status(&self, execution_id: &str, status: ExecutionStatus) -> WorkflowResult<()>;

    async fn append_log(&self, execution_id: &str, entry: LogEntry) -> WorkflowResult<()>;

    async fn logs(&self, execution_id: &str) -> WorkflowResult<Vec<LogEntry>>;
}

#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<String, (ExecutionContext, ExecutionStatus)>>,
    logs: RwLock<HashMap<String, Vec<LogEntry>>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn save(
        &self,
        context: &ExecutionContext,
        status: ExecutionStatus,
    ) -> WorkflowResult<()> {
        self.executions
            .write()
            .insert(context.execution_id.clone(), (context.clone(), status));
        Ok(())
    }

    async fn load(
        &self,
        execution_id: &str,
    ) -> WorkflowResult<(ExecutionContext, ExecutionStatus)> {
        self.executions
            .read()
            .get(execution_id)
            .cloned()
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))
    }

    async fn status(&self, execution_id: &str) -> WorkflowResult<ExecutionStatus> {
        Ok(self.load(execution_id).await?.1)
    }

    async fn set_status(&self, execution_id: &str, status: ExecutionStatus) -> WorkflowResult<()> {
        let mut guard = self.executions.write();
        let entry = guard
            .get_mut(execution_id)
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))?;
        entry.1 = status;
        Ok(())
    }

    async fn append_log(&self, execution_id: &str, entry: LogEntry) -> WorkflowResult<()> {
        self.logs
            .write()
            .entry(execution_id.to_string())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn logs(&self, execution_id: &str) -> WorkflowResult<Vec<LogEntry>> {
        Ok(self
            .logs
            .read()
            .get(execution_id)
            .cloned()
            .unwrap_or_default())
    }
}
