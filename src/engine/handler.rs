//! Node dispatch: the handler trait, the category registry, and the
//! sub-sequence seam loop nodes use to run their bodies.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::NodeError;
use crate::model::{ExecutionContext, ExecutionResult, Node, NodeType, ResultStatus};
use crate::runtime::RuntimeContext;

/// One implementation per node category; behavior branches on
/// [`Node::subtype`] internally. Handlers may mutate `ctx.variables` and
/// read everything else; context lifecycle belongs to the engine.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError>;
}

/// Category-to-handler table built at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<NodeType, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node_type: NodeType, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(node_type, handler);
    }

    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(&node_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<NodeType> {
        self.handlers.keys().copied().collect()
    }
}

/// Seam for container nodes (loops) to dispatch their body nodes without
/// owning the registry. Body nodes run in order, sharing the parent
/// variable scope; connections between body nodes are ignored.
#[async_trait]
pub trait SubSequenceRunner: Send + Sync {
    async fn run_sequence(
        &self,
        body: &[Node],
        ctx: &mut ExecutionContext,
    ) -> Result<(), NodeError>;
}

/// Default runner backed by the engine's registry. The registry is wired
/// after construction: the loop handler is itself registered, so the
/// runner cannot hold the finished registry at build time.
pub struct RegistrySequenceRunner {
    runtime: RuntimeContext,
    registry: RwLock<Option<Arc<HandlerRegistry>>>,
}

impl RegistrySequenceRunner {
    pub fn new(runtime: RuntimeContext) -> Self {
        Self {
            runtime,
            registry: RwLock::new(None),
        }
    }

    pub fn set_registry(&self, registry: Arc<HandlerRegistry>) {
        *self.registry.write() = Some(registry);
    }
}

#[async_trait]
impl SubSequenceRunner for RegistrySequenceRunner {
    async fn run_sequence(
        &self,
        body: &[Node],
        ctx: &mut ExecutionContext,
    ) -> Result<(), NodeError> {
        let registry = self
            .registry
            .read()
            .clone()
            .ok_or_else(|| NodeError::ExecutionError("sequence runner not wired".into()))?;

        for node in body {
            let handler = registry.get(node.node_type).ok_or_else(|| {
                NodeError::ExecutionError(format!("no handler for node type: {}", node.node_type))
            })?;
            debug!(node_id = %node.id, node_type = %node.node_type, "dispatching body node");

            let result = handler.execute(node, ctx).await?;
            match result.status {
                ResultStatus::Success => {
                    for (key, value) in result.output {
                        ctx.set_variable(key, value);
                    }
                    ctx.record_node(&node.id, &result.outcome, self.runtime.now());
                }
                ResultStatus::Failed => {
                    return Err(NodeError::ExecutionError(
                        result
                            .error_message
                            .unwrap_or_else(|| format!("body node failed: {}", node.id)),
                    ));
                }
                ResultStatus::Paused | ResultStatus::Waiting => {
                    return Err(NodeError::SuspensionUnsupported(format!(
                        "node {} inside a loop body",
                        node.id
                    )));
                }
            }
        }
        Ok(())
    }
}
