//! Graph traversal: node dispatch, suspension, resumption, trigger ingress.

mod config;
mod handler;

pub use config::EngineConfig;
pub use handler::{HandlerRegistry, NodeHandler, RegistrySequenceRunner, SubSequenceRunner};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::approval::ExecutionResumer;
use crate::error::{WorkflowError, WorkflowResult};
use crate::model::{
    ExecutionContext, ExecutionResult, ExecutionStatus, LogEntry, LogLevel, Node, ResultStatus,
    Workflow,
};
use crate::runtime::RuntimeContext;
use crate::services::{ExecutionStore, WorkflowStore};

/// Drives one execution at a time: a single traversal never runs two nodes
/// concurrently, distinct executions are independent.
pub struct ExecutionEngine {
    config: EngineConfig,
    runtime: RuntimeContext,
    registry: Arc<HandlerRegistry>,
    workflows: Arc<dyn WorkflowStore>,
    executions: Arc<dyn ExecutionStore>,
}

impl ExecutionEngine {
    pub fn new(
        config: EngineConfig,
        runtime: RuntimeContext,
        registry: Arc<HandlerRegistry>,
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionStore>,
    ) -> Self {
        Self {
            config,
            runtime,
            registry,
            workflows,
            executions,
        }
    }

    /// Start a fresh execution at the workflow's trigger node and run it
    /// until completion, failure, or a suspension point.
    ///
    /// A business-logic failure still returns `Ok`: the FAILED status and
    /// error message live on the returned context. `Err` means the engine
    /// itself could not proceed.
    pub async fn start(
        &self,
        workflow: &Workflow,
        trigger_data: Value,
        tenant_id: &str,
    ) -> WorkflowResult<ExecutionContext> {
        if !workflow.active {
            return Err(WorkflowError::WorkflowInactive(workflow.id.clone()));
        }
        let entry = match workflow.graph.entry_points().as_slice() {
            [] => return Err(WorkflowError::NoTriggerNode),
            [one] => (*one).clone(),
            _ => return Err(WorkflowError::MultipleTriggerNodes),
        };

        let mut ctx = ExecutionContext::new(
            &workflow.id,
            workflow.version,
            self.runtime.next_id(),
            tenant_id,
            trigger_data,
        );
        ctx.current_node_id = Some(entry.id.clone());
        self.executions.save(&ctx, ExecutionStatus::Running).await?;
        info!(
            execution_id = %ctx.execution_id,
            workflow_id = %workflow.id,
            "execution started"
        );
        self.log(
            &ctx.execution_id,
            LogLevel::Info,
            format!("Execution started for workflow {}", workflow.key),
        )
        .await;

        self.run(workflow, &mut ctx).await?;
        Ok(ctx)
    }

    /// Start an execution by workflow id, loading the graph from the store.
    /// Used by sub-workflow nodes, which only carry the target's id.
    pub async fn start_by_id(
        &self,
        workflow_id: &str,
        trigger_data: Value,
        tenant_id: &str,
    ) -> WorkflowResult<ExecutionContext> {
        let workflow = self.workflows.get(workflow_id).await?;
        self.start(&workflow, trigger_data, tenant_id).await
    }

    /// Re-enter a suspended execution at its paused node. The resume
    /// payload is merged into `variables` before the node's handler runs
    /// again; the handler decides whether to continue past or fail.
    pub async fn resume(
        &self,
        execution_id: &str,
        resume_data: Value,
    ) -> WorkflowResult<ExecutionContext> {
        let (mut ctx, status) = self.executions.load(execution_id).await?;
        if !status.is_suspended() {
            return Err(WorkflowError::NotResumable {
                execution_id: execution_id.to_string(),
                status: format!("{status:?}"),
            });
        }
        if let Some(payload) = resume_data.as_object() {
            for (key, value) in payload {
                ctx.set_variable(key.clone(), value.clone());
            }
        }

        let workflow = self.workflows.get(&ctx.workflow_id).await?;
        self.executions
            .set_status(execution_id, ExecutionStatus::Running)
            .await?;
        info!(execution_id, "execution resumed");
        self.log(execution_id, LogLevel::Info, "Execution resumed".into())
            .await;

        self.run(&workflow, &mut ctx).await?;
        Ok(ctx)
    }

    /// Restart a FAILED execution from the trigger with its stored context.
    pub async fn retry(&self, execution_id: &str) -> WorkflowResult<ExecutionContext> {
        let (mut ctx, status) = self.executions.load(execution_id).await?;
        if status != ExecutionStatus::Failed {
            return Err(WorkflowError::NotResumable {
                execution_id: execution_id.to_string(),
                status: format!("{status:?}"),
            });
        }
        let workflow = self.workflows.get(&ctx.workflow_id).await?;
        let entry = match workflow.graph.entry_points().as_slice() {
            [one] => (*one).clone(),
            _ => return Err(WorkflowError::NoTriggerNode),
        };
        ctx.error_message = None;
        ctx.current_node_id = Some(entry.id.clone());
        self.executions.save(&ctx, ExecutionStatus::Running).await?;
        self.log(execution_id, LogLevel::Info, "Execution retried".into())
            .await;

        self.run(&workflow, &mut ctx).await?;
        Ok(ctx)
    }

    /// Request cancellation. The traversal loop observes the status before
    /// each node, so a running execution stops after its current node; no
    /// mid-node preemption.
    pub async fn cancel(&self, execution_id: &str) -> WorkflowResult<()> {
        let status = self.executions.status(execution_id).await?;
        if status.is_terminal() {
            return Err(WorkflowError::NotResumable {
                execution_id: execution_id.to_string(),
                status: format!("{status:?}"),
            });
        }
        self.executions
            .set_status(execution_id, ExecutionStatus::Cancelled)
            .await?;
        self.log(execution_id, LogLevel::Info, "Execution cancelled".into())
            .await;
        Ok(())
    }

    /// Current persisted status of an execution.
    pub async fn status(&self, execution_id: &str) -> WorkflowResult<ExecutionStatus> {
        self.executions.status(execution_id).await
    }

    /// Trigger ingress: start one execution per active workflow matching
    /// `(module_type, trigger_type)`. Individual start failures are logged
    /// and skipped; returns how many executions were started.
    pub async fn trigger(
        &self,
        tenant_id: &str,
        module_type: &str,
        trigger_type: &str,
        record_data: Value,
    ) -> usize {
        let matching = self.workflows.find_active(module_type, trigger_type).await;
        let mut started = 0;
        for workflow in matching {
            match self.start(&workflow, record_data.clone(), tenant_id).await {
                Ok(_) => started += 1,
                Err(e) => {
                    warn!(
                        workflow_id = %workflow.id,
                        error = %e,
                        "failed to start triggered workflow"
                    );
                }
            }
        }
        started
    }

    async fn run(
        &self,
        workflow: &Workflow,
        ctx: &mut ExecutionContext,
    ) -> WorkflowResult<ExecutionStatus> {
        let mut steps = 0u32;
        let status = loop {
            let Some(node_id) = ctx.current_node_id.clone() else {
                break ExecutionStatus::Completed;
            };
            if self.executions.status(&ctx.execution_id).await? == ExecutionStatus::Cancelled {
                break ExecutionStatus::Cancelled;
            }
            steps += 1;
            if steps > self.config.max_steps {
                ctx.error_message = Some(format!(
                    "traversal exceeded {} steps",
                    self.config.max_steps
                ));
                self.executions.save(ctx, ExecutionStatus::Failed).await?;
                return Err(WorkflowError::MaxStepsExceeded(self.config.max_steps));
            }

            let node = workflow
                .graph
                .node(&node_id)
                .ok_or_else(|| WorkflowError::NodeNotFound(node_id.clone()))?;
            let result = self.dispatch(node, ctx).await;

            match result.status {
                ResultStatus::Success => {
                    for (key, value) in result.output {
                        ctx.set_variable(key, value);
                    }
                    ctx.record_node(&node.id, &result.outcome, self.runtime.now());
                    self.log(
                        &ctx.execution_id,
                        LogLevel::Info,
                        format!("Node {} completed with outcome {}", node.id, result.outcome),
                    )
                    .await;
                    // A missing edge for the outcome is a valid dead end.
                    ctx.current_node_id = node.connections.get(&result.outcome).cloned();
                }
                ResultStatus::Failed => {
                    let message = result
                        .error_message
                        .unwrap_or_else(|| "node execution failed".to_string());
                    ctx.record_node(&node.id, "failed", self.runtime.now());
                    ctx.error_message = Some(message.clone());
                    self.log(
                        &ctx.execution_id,
                        LogLevel::Error,
                        format!("Node {} failed: {message}", node.id),
                    )
                    .await;
                    break ExecutionStatus::Failed;
                }
                ResultStatus::Paused | ResultStatus::Waiting => {
                    // current_node_id stays at the suspended node; resume
                    // re-enters the same handler.
                    for (key, value) in result.output {
                        ctx.set_variable(key, value);
                    }
                    let reason = result.pause_reason.unwrap_or_default();
                    self.log(
                        &ctx.execution_id,
                        LogLevel::Info,
                        format!("Node {} suspended: {reason}", node.id),
                    )
                    .await;
                    break if result.status == ResultStatus::Paused {
                        ExecutionStatus::Paused
                    } else {
                        ExecutionStatus::WaitingApproval
                    };
                }
            }
        };

        self.executions.save(ctx, status).await?;
        Ok(status)
    }

    /// Handler errors never escape the dispatch boundary: they become
    /// FAILED results so one broken node cannot corrupt the audit trail.
    async fn dispatch(&self, node: &Node, ctx: &mut ExecutionContext) -> ExecutionResult {
        let Some(handler) = self.registry.get(node.node_type) else {
            return ExecutionResult::failed(format!(
                "no handler registered for node type: {}",
                node.node_type
            ));
        };
        match handler.execute(node, ctx).await {
            Ok(result) => result,
            Err(e) => {
                error!(node_id = %node.id, error = %e, "node execution error");
                ExecutionResult::failed(e.to_string())
            }
        }
    }

    async fn log(&self, execution_id: &str, level: LogLevel, message: String) {
        let entry = LogEntry {
            level,
            message,
            timestamp: self.runtime.now(),
        };
        if let Err(e) = self.executions.append_log(execution_id, entry).await {
            warn!(execution_id, error = %e, "failed to append execution log");
        }
    }
}

#[async_trait]
impl ExecutionResumer for ExecutionEngine {
    async fn resume_execution(&self, execution_id: &str, resume_data: Value) -> WorkflowResult<()> {
        self.resume(execution_id, resume_data).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use crate::error::NodeError;
    use crate::model::{NodeType, WorkflowGraph};
    use crate::services::{InMemoryExecutionStore, InMemoryWorkflowStore};

    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl NodeHandler for EchoHandler {
        async fn execute(
            &self,
            node: &Node,
            _ctx: &mut ExecutionContext,
        ) -> Result<ExecutionResult, NodeError> {
            let mut output = BTreeMap::new();
            output.insert(format!("ran_{}", node.id), json!(true));
            Ok(ExecutionResult::success_with(output))
        }
    }

    struct PauseOnFirstVisit;

    #[async_trait]
    impl NodeHandler for PauseOnFirstVisit {
        async fn execute(
            &self,
            _node: &Node,
            ctx: &mut ExecutionContext,
        ) -> Result<ExecutionResult, NodeError> {
            if ctx.variable("resumed").is_some() {
                Ok(ExecutionResult::success())
            } else {
                Ok(ExecutionResult::paused("waiting for resume"))
            }
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl NodeHandler for FailingHandler {
        async fn execute(
            &self,
            _node: &Node,
            _ctx: &mut ExecutionContext,
        ) -> Result<ExecutionResult, NodeError> {
            Err(NodeError::ExecutionError("boom".into()))
        }
    }

    fn workflow(nodes: Vec<Node>) -> Workflow {
        Workflow::new(
            "wf-1",
            "test-flow",
            "LEAD",
            "record_created",
            WorkflowGraph::new(nodes),
        )
    }

    async fn engine_with(
        registry: HandlerRegistry,
        wf: &Workflow,
    ) -> (ExecutionEngine, Arc<InMemoryExecutionStore>) {
        let workflows = Arc::new(InMemoryWorkflowStore::new());
        workflows.save(wf.clone()).await.unwrap();
        let executions = Arc::new(InMemoryExecutionStore::new());
        let engine = ExecutionEngine::new(
            EngineConfig::default(),
            RuntimeContext::fake(),
            Arc::new(registry),
            workflows,
            executions.clone(),
        );
        (engine, executions)
    }

    fn echo_registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register(NodeType::Trigger, Arc::new(EchoHandler));
        registry.register(NodeType::Task, Arc::new(EchoHandler));
        registry
    }

    #[tokio::test]
    async fn test_linear_traversal_completes() {
        let wf = workflow(vec![
            Node::new("start", NodeType::Trigger, "record_created").connect("default", "t1"),
            Node::new("t1", NodeType::Task, "create_task").connect("default", "t2"),
            Node::new("t2", NodeType::Task, "create_task"),
        ]);
        let (engine, executions) = engine_with(echo_registry(), &wf).await;

        let ctx = engine.start(&wf, json!({}), "tenant-1").await.unwrap();
        assert_eq!(ctx.executed_nodes.len(), 3);
        assert_eq!(ctx.variable("ran_t2"), Some(&json!(true)));
        assert_eq!(
            executions.status(&ctx.execution_id).await.unwrap(),
            ExecutionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_dead_end_outcome_terminates_branch() {
        let wf = workflow(vec![
            Node::new("start", NodeType::Trigger, "record_created").connect("other", "t1"),
            Node::new("t1", NodeType::Task, "create_task"),
        ]);
        let (engine, executions) = engine_with(echo_registry(), &wf).await;

        // EchoHandler produces "default"; "other" never matches, so only
        // the trigger runs.
        let ctx = engine.start(&wf, json!({}), "tenant-1").await.unwrap();
        assert_eq!(ctx.executed_nodes.len(), 1);
        assert_eq!(
            executions.status(&ctx.execution_id).await.unwrap(),
            ExecutionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failed_execution() {
        let mut registry = echo_registry();
        registry.register(NodeType::Data, Arc::new(FailingHandler));
        let wf = workflow(vec![
            Node::new("start", NodeType::Trigger, "record_created").connect("default", "d1"),
            Node::new("d1", NodeType::Data, "create_record").connect("default", "t1"),
            Node::new("t1", NodeType::Task, "create_task"),
        ]);
        let (engine, executions) = engine_with(registry, &wf).await;

        let ctx = engine.start(&wf, json!({}), "tenant-1").await.unwrap();
        assert_eq!(
            executions.status(&ctx.execution_id).await.unwrap(),
            ExecutionStatus::Failed
        );
        assert!(ctx.error_message.as_deref().unwrap().contains("boom"));
        // The failed node is in the audit trail, its successor never ran.
        assert_eq!(ctx.executed_nodes.last().unwrap().node_id, "d1");
        assert_eq!(ctx.executed_nodes.last().unwrap().outcome, "failed");
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let mut registry = echo_registry();
        registry.register(NodeType::Delay, Arc::new(PauseOnFirstVisit));
        let wf = workflow(vec![
            Node::new("start", NodeType::Trigger, "record_created").connect("default", "wait"),
            Node::new("wait", NodeType::Delay, "wait_duration").connect("default", "t1"),
            Node::new("t1", NodeType::Task, "create_task"),
        ]);
        let (engine, executions) = engine_with(registry, &wf).await;

        let ctx = engine.start(&wf, json!({}), "tenant-1").await.unwrap();
        assert_eq!(
            executions.status(&ctx.execution_id).await.unwrap(),
            ExecutionStatus::Paused
        );
        // Resumption pointer stays at the paused node.
        assert_eq!(ctx.current_node_id.as_deref(), Some("wait"));

        let resumed = engine
            .resume(&ctx.execution_id, json!({"resumed": true}))
            .await
            .unwrap();
        assert_eq!(
            executions.status(&resumed.execution_id).await.unwrap(),
            ExecutionStatus::Completed
        );
        assert_eq!(resumed.variable("ran_t1"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_resume_running_execution_is_error() {
        let wf = workflow(vec![Node::new("start", NodeType::Trigger, "record_created")]);
        let (engine, _) = engine_with(echo_registry(), &wf).await;
        let ctx = engine.start(&wf, json!({}), "tenant-1").await.unwrap();

        let err = engine.resume(&ctx.execution_id, json!({})).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotResumable { .. }));
    }

    #[tokio::test]
    async fn test_inactive_workflow_rejected() {
        let mut wf = workflow(vec![Node::new("start", NodeType::Trigger, "record_created")]);
        wf.active = false;
        let (engine, _) = engine_with(echo_registry(), &wf).await;
        assert!(matches!(
            engine.start(&wf, json!({}), "tenant-1").await,
            Err(WorkflowError::WorkflowInactive(_))
        ));
    }

    #[tokio::test]
    async fn test_max_steps_is_engine_fatal() {
        // a <-> b cycle; the validator would reject this graph, the engine
        // still refuses to spin forever.
        let wf = workflow(vec![
            Node::new("start", NodeType::Trigger, "record_created").connect("default", "a"),
            Node::new("a", NodeType::Task, "create_task").connect("default", "b"),
            Node::new("b", NodeType::Task, "create_task").connect("default", "a"),
        ]);
        let mut config = EngineConfig::default();
        config.max_steps = 10;
        let workflows = Arc::new(InMemoryWorkflowStore::new());
        workflows.save(wf.clone()).await.unwrap();
        let executions = Arc::new(InMemoryExecutionStore::new());
        let engine = ExecutionEngine::new(
            config,
            RuntimeContext::fake(),
            Arc::new(echo_registry()),
            workflows,
            executions,
        );

        let err = engine.start(&wf, json!({}), "tenant-1").await.unwrap_err();
        assert!(matches!(err, WorkflowError::MaxStepsExceeded(10)));
    }

    #[tokio::test]
    async fn test_trigger_ingress_counts_started() {
        let wf_a = workflow(vec![Node::new("start", NodeType::Trigger, "record_created")]);
        let mut wf_b = wf_a.clone();
        wf_b.id = "wf-2".into();
        let mut wf_inactive = wf_a.clone();
        wf_inactive.id = "wf-3".into();
        wf_inactive.active = false;

        let workflows = Arc::new(InMemoryWorkflowStore::new());
        for wf in [&wf_a, &wf_b, &wf_inactive] {
            workflows.save((*wf).clone()).await.unwrap();
        }
        let engine = ExecutionEngine::new(
            EngineConfig::default(),
            RuntimeContext::fake(),
            Arc::new(echo_registry()),
            workflows,
            Arc::new(InMemoryExecutionStore::new()),
        );

        let started = engine
            .trigger("tenant-1", "LEAD", "record_created", json!({"id": "l1"}))
            .await;
        assert_eq!(started, 2);
    }

    #[tokio::test]
    async fn test_retry_failed_execution() {
        let mut registry = echo_registry();
        registry.register(NodeType::Data, Arc::new(FailingHandler));
        let wf = workflow(vec![
            Node::new("start", NodeType::Trigger, "record_created").connect("default", "d1"),
            Node::new("d1", NodeType::Data, "create_record"),
        ]);
        let (engine, executions) = engine_with(registry, &wf).await;
        let ctx = engine.start(&wf, json!({}), "tenant-1").await.unwrap();
        assert_eq!(
            executions.status(&ctx.execution_id).await.unwrap(),
            ExecutionStatus::Failed
        );

        // Retry re-runs from the trigger; still fails, but went through
        // the whole path again.
        let retried = engine.retry(&ctx.execution_id).await.unwrap();
        assert!(retried.executed_nodes.len() > ctx.executed_nodes.len());
    }
}
