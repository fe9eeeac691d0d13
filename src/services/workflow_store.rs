//! Workflow definition registry.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{WorkflowError, WorkflowResult};
use crate::model::{Workflow, WorkflowGraph};

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get(&self, workflow_id: &str) -> WorkflowResult<Workflow>;

    /// Active workflows matching a trigger, in registration order.
    async fn find_active(&self, module_type: &str, trigger_type: &str) -> Vec<Workflow>;

    async fn save(&self, workflow: Workflow) -> WorkflowResult<()>;

    /// Replace a workflow's graph. Bumps `version` so in-flight executions
    /// keep referencing the version they started under.
    async fn update_graph(&self, workflow_id: &str, graph: WorkflowGraph) -> WorkflowResult<u32>;

    async fn set_active(&self, workflow_id: &str, active: bool) -> WorkflowResult<()>;
}

#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<String, Workflow>>,
    order: RwLock<Vec<String>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn get(&self, workflow_id: &str) -> WorkflowResult<Workflow> {
        self.workflows
            .read()
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))
    }

    async fn find_active(&self, module_type: &str, trigger_type: &str) -> Vec<Workflow> {
        let workflows = self.workflows.read();
        self.order
            .read()
            .iter()
            .filter_map(|id| workflows.get(id))
            .filter(|wf| {
                wf.active && wf.module_type == module_type && wf.trigger_type == trigger_type
            })
            .cloned()
            .collect()
    }

    async fn save(&self, workflow: Workflow) -> WorkflowResult<()> {
        let mut workflows = self.workflows.write();
        if !workflows.contains_key(&workflow.id) {
            self.order.write().push(workflow.id.clone());
        }
        workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    async fn update_graph(&self, workflow_id: &str, graph: WorkflowGraph) -> WorkflowResult<u32> {
        let mut workflows = self.workflows.write();
        let workflow = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;
        workflow.graph = graph;
        workflow.version += 1;
        Ok(workflow.version)
    }

    async fn set_active(&self, workflow_id: &str, active: bool) -> WorkflowResult<()> {
        let mut workflows = self.workflows.write();
        let workflow = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;
        workflow.active = active;
        Ok(())
    }
}
