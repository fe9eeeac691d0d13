//! The thirteen node-category handlers and the wiring that assembles them
//! into a [`HandlerRegistry`].

mod approval;
mod collection;
mod communication;
mod condition;
mod data;
mod delay;
mod error;
mod event;
mod integration;
mod list;
mod scheduled;
mod support;
mod task;
mod trigger;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::approval::ApprovalOrchestrator;
use crate::assignment::AssignmentEngine;
use crate::engine::{
    EngineConfig, ExecutionEngine, HandlerRegistry, RegistrySequenceRunner,
};
use crate::error::WorkflowResult;
use crate::model::{ExecutionContext, ExecutionStatus, NodeType};
use crate::runtime::RuntimeContext;
use crate::services::{
    ActivityStore, EntityStore, HttpExecutor, MessageChannel, NotificationSink,
};

pub use approval::ApprovalHandler;
pub use collection::CollectionHandler;
pub use communication::CommunicationHandler;
pub use condition::ConditionHandler;
pub use data::DataHandler;
pub use delay::DelayHandler;
pub use error::ErrorHandler;
pub use event::EventHandler;
pub use integration::{CustomFunction, IntegrationHandler, SubflowRunner};
pub use list::ListHandler;
pub use scheduled::ScheduledHandler;
pub use task::TaskHandler;
pub use trigger::TriggerHandler;

/// The collaborators node handlers are built over. One instance per
/// tenant-serving engine; every field is a trait seam except the runtime
/// and the two pure engines.
#[derive(Clone)]
pub struct NodeServices {
    pub runtime: RuntimeContext,
    pub entities: Arc<dyn EntityStore>,
    pub activities: Arc<dyn ActivityStore>,
    pub messenger: Arc<dyn MessageChannel>,
    pub notifications: Arc<dyn NotificationSink>,
    pub http: Arc<dyn HttpExecutor>,
    pub approvals: Arc<ApprovalOrchestrator>,
    pub assignment: Arc<AssignmentEngine>,
}

/// Registry plus the handles that need post-construction wiring.
pub struct BuiltHandlers {
    pub registry: Arc<HandlerRegistry>,
    /// Kept out for function registration and subflow-runner wiring.
    pub integration: Arc<IntegrationHandler>,
}

/// Assemble the full category-to-handler table. The sequence runner used
/// by loop bodies is wired back to the finished registry before returning.
pub fn build_registry(services: &NodeServices, config: &EngineConfig) -> BuiltHandlers {
    let sequence_runner = Arc::new(RegistrySequenceRunner::new(services.runtime.clone()));
    let integration = Arc::new(IntegrationHandler::new(services.http.clone()));

    let mut registry = HandlerRegistry::new();
    registry.register(NodeType::Trigger, Arc::new(TriggerHandler));
    registry.register(
        NodeType::Condition,
        Arc::new(ConditionHandler::new(services.runtime.clone())),
    );
    registry.register(
        NodeType::Data,
        Arc::new(DataHandler::new(
            services.entities.clone(),
            services.assignment.clone(),
        )),
    );
    registry.register(
        NodeType::Communication,
        Arc::new(CommunicationHandler::new(
            services.messenger.clone(),
            services.notifications.clone(),
        )),
    );
    registry.register(
        NodeType::Task,
        Arc::new(TaskHandler::new(services.activities.clone())),
    );
    registry.register(
        NodeType::Approval,
        Arc::new(ApprovalHandler::new(services.approvals.clone())),
    );
    registry.register(
        NodeType::Delay,
        Arc::new(DelayHandler::new(services.runtime.clone())),
    );
    registry.register(NodeType::Integration, integration.clone());
    registry.register(
        NodeType::List,
        Arc::new(ListHandler::new(services.entities.clone())),
    );
    registry.register(NodeType::Error, Arc::new(ErrorHandler));
    registry.register(
        NodeType::Collection,
        Arc::new(CollectionHandler::new(
            sequence_runner.clone(),
            config.max_loop_iterations,
        )),
    );
    registry.register(
        NodeType::Scheduled,
        Arc::new(ScheduledHandler::new(services.runtime.clone())),
    );
    registry.register(NodeType::Event, Arc::new(EventHandler));

    let registry = Arc::new(registry);
    sequence_runner.set_registry(registry.clone());
    BuiltHandlers {
        registry,
        integration,
    }
}

#[async_trait]
impl SubflowRunner for ExecutionEngine {
    async fn run_subflow(
        &self,
        workflow_id: &str,
        input: Value,
        tenant_id: &str,
    ) -> WorkflowResult<(ExecutionContext, ExecutionStatus)> {
        let ctx = self.start_by_id(workflow_id, input, tenant_id).await?;
        let status = self.status(&ctx.execution_id).await?;
        Ok((ctx, status))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::approval::ExpiryPolicy;
    use crate::services::{
        InMemoryActivityStore, InMemoryEntityStore, InMemoryMessenger, InMemoryNotificationSink,
        StubHttpExecutor,
    };

    use super::*;

    fn services() -> NodeServices {
        let runtime = RuntimeContext::fake();
        let notifications = Arc::new(InMemoryNotificationSink::new());
        NodeServices {
            runtime: runtime.clone(),
            entities: Arc::new(InMemoryEntityStore::new(runtime.clone())),
            activities: Arc::new(InMemoryActivityStore::new(runtime.clone())),
            messenger: Arc::new(InMemoryMessenger::new(runtime.clone())),
            notifications: notifications.clone(),
            http: Arc::new(StubHttpExecutor::new()),
            approvals: Arc::new(ApprovalOrchestrator::new(
                runtime,
                notifications,
                72,
                ExpiryPolicy::ForceReject,
            )),
            assignment: Arc::new(AssignmentEngine::new()),
        }
    }

    #[test]
    fn test_registry_covers_all_categories() {
        let built = build_registry(&services(), &EngineConfig::default());
        for node_type in NodeType::ALL {
            assert!(
                built.registry.get(node_type).is_some(),
                "no handler for {node_type}"
            );
        }
    }

    #[tokio::test]
    async fn test_loop_bodies_dispatch_through_registry() {
        let built = build_registry(&services(), &EngineConfig::default());
        let handler = built.registry.get(NodeType::Collection).unwrap();
        let node = crate::model::Node::new("c1", NodeType::Collection, "loop").with_config(json!({
            "collection": "items",
            "maxIterations": 5,
            "body": [{
                "id": "b1",
                "type": "data",
                "subtype": "set_field",
                "config": {"field": "touched", "value": true}
            }]
        }));
        let mut ctx = ExecutionContext::new("wf-1", 1, "ex-1", "acme", json!({}));
        ctx.set_variable("items", json!([1, 2]));

        let result = handler.execute(&node, &mut ctx).await.unwrap();
        assert!(result.is_success());
        assert_eq!(ctx.variable("touched"), Some(&json!(true)));
    }
}
