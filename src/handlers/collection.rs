//! Collection nodes: iterate, filter and sort JSON arrays held in the
//! variables. Records are plain key-value objects; a loop body is an
//! inline node sequence dispatched through [`SubSequenceRunner`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::engine::{NodeHandler, SubSequenceRunner};
use crate::error::NodeError;
use crate::model::{ExecutionContext, ExecutionResult, Node};
use crate::template;

use super::support;

const DEFAULT_ITEM_VARIABLE: &str = "currentItem";
const DEFAULT_INDEX_VARIABLE: &str = "currentIndex";

pub struct CollectionHandler {
    runner: Arc<dyn SubSequenceRunner>,
    /// Cap for loop nodes without their own `maxIterations`.
    default_max_iterations: usize,
}

impl CollectionHandler {
    pub fn new(runner: Arc<dyn SubSequenceRunner>, default_max_iterations: usize) -> Self {
        Self {
            runner,
            default_max_iterations,
        }
    }

    fn items(node: &Node, ctx: &ExecutionContext, key: &str) -> Result<Vec<Value>, NodeError> {
        let name = node
            .config_str(key)
            .ok_or_else(|| NodeError::ConfigError(format!("missing required field: {key}")))?;
        let value = template::resolve_path(name, &ctx.variables)
            .cloned()
            .unwrap_or(Value::Null);
        match value {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(NodeError::TypeError(format!(
                "{name} is not a collection: {other}"
            ))),
        }
    }

    async fn run_loop(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let items = Self::items(node, ctx, "collection")?;
        let body: Vec<Node> = match node.config.get("body") {
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| NodeError::ConfigError(format!("invalid loop body: {e}")))?,
            None => Vec::new(),
        };
        let item_var = node
            .config_str("itemVariable")
            .unwrap_or(DEFAULT_ITEM_VARIABLE)
            .to_string();
        let index_var = node
            .config_str("indexVariable")
            .unwrap_or(DEFAULT_INDEX_VARIABLE)
            .to_string();
        let max_iterations = node
            .config_i64("maxIterations")
            .map(|n| n.max(0) as usize)
            .unwrap_or(self.default_max_iterations);

        let mut iterations = 0;
        for (index, item) in items.into_iter().enumerate() {
            if iterations >= max_iterations {
                info!(max_iterations, "loop iteration cap reached");
                break;
            }
            ctx.set_variable(item_var.clone(), item);
            ctx.set_variable(index_var.clone(), json!(index));
            self.runner.run_sequence(&body, ctx).await?;
            iterations += 1;
        }
        ctx.variables.remove(&item_var);
        ctx.variables.remove(&index_var);

        let mut output = BTreeMap::new();
        output.insert("iterations".into(), json!(iterations));
        Ok(ExecutionResult::success_with(output))
    }

    fn filter(node: &Node, ctx: &mut ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let items = Self::items(node, ctx, "variable")?;
        let field = node
            .config_str("field")
            .ok_or_else(|| NodeError::ConfigError("missing required field: field".into()))?;
        let operator = node.config_str("operator").unwrap_or("equals");
        let expected = node.config.get("value").cloned();

        let kept: Vec<Value> = items
            .into_iter()
            .filter(|item| support::evaluate_condition(item.get(field), operator, expected.as_ref()))
            .collect();
        let output_var = node
            .config_str("outputVariable")
            .unwrap_or("filteredResults");
        let count = kept.len();
        ctx.set_variable(output_var, json!(kept));

        let mut output = BTreeMap::new();
        output.insert("filteredCount".into(), json!(count));
        Ok(ExecutionResult::success_with(output))
    }

    fn sort(node: &Node, ctx: &mut ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let mut items = Self::items(node, ctx, "variable")?;
        let field = node
            .config_str("sortBy")
            .or_else(|| node.config_str("field"))
            .ok_or_else(|| NodeError::ConfigError("missing required field: sortBy".into()))?;
        let descending = node
            .config_str("order")
            .map(|o| o.eq_ignore_ascii_case("desc"))
            .unwrap_or(false);

        items.sort_by(|a, b| {
            let ordering = support::compare_values(a.get(field), b.get(field));
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
        let output_var = node
            .config_str("outputVariable")
            .unwrap_or("sortedResults");
        let count = items.len();
        ctx.set_variable(output_var, json!(items));

        let mut output = BTreeMap::new();
        output.insert("sortedCount".into(), json!(count));
        Ok(ExecutionResult::success_with(output))
    }
}

#[async_trait]
impl NodeHandler for CollectionHandler {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        match node.subtype.as_str() {
            "loop" => self.run_loop(node, ctx).await,
            "filter_collection" => Self::filter(node, ctx),
            "sort_collection" => Self::sort(node, ctx),
            other => Err(NodeError::UnknownSubtype {
                node_type: node.node_type.to_string(),
                subtype: other.to_string(),
            }),
        }
    }
}
