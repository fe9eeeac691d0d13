//! Record CRUD, field operations, and owner assignment against the
//! entity store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::assignment::AssignmentEngine;
use crate::engine::NodeHandler;
use crate::error::NodeError;
use crate::model::{ExecutionContext, ExecutionResult, Node};
use crate::services::EntityStore;
use crate::template;

use super::support;

const DEFAULT_QUERY_LIMIT: usize = 100;

pub struct DataHandler {
    entities: Arc<dyn EntityStore>,
    assignment: Arc<AssignmentEngine>,
}

impl DataHandler {
    pub fn new(entities: Arc<dyn EntityStore>, assignment: Arc<AssignmentEngine>) -> Self {
        Self {
            entities,
            assignment,
        }
    }

    async fn query(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let entity = support::require_resolved(node, ctx, "entity")?;
        let limit = node
            .config_i64("limit")
            .map(|n| n.max(0) as usize)
            .unwrap_or(DEFAULT_QUERY_LIMIT);

        let criteria = if node.subtype == "search_records" {
            let field = support::require_resolved(node, ctx, "searchField")?;
            let value = support::require_resolved(node, ctx, "searchValue")?;
            json!({ field: value })
        } else {
            support::resolved_map(node, ctx, "criteria").unwrap_or_else(|| json!({}))
        };

        let records = self.entities.query(&entity, &criteria, Some(limit)).await?;
        info!(entity, count = records.len(), "query returned records");

        ctx.set_variable("queryResults", json!(records));
        ctx.set_variable("recordCount", json!(records.len()));

        let mut output = BTreeMap::new();
        output.insert("count".into(), json!(records.len()));
        output.insert("records".into(), json!(records));
        Ok(ExecutionResult::success_with(output))
    }

    async fn create(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let entity = support::require_resolved(node, ctx, "entity")?;
        let mut output = BTreeMap::new();

        match node.subtype.as_str() {
            "create_multiple" => {
                let records = node
                    .config
                    .get("records")
                    .and_then(Value::as_array)
                    .cloned()
                    .ok_or_else(|| {
                        NodeError::ConfigError("create_multiple requires a records list".into())
                    })?;
                let mut created = Vec::with_capacity(records.len());
                for record in records {
                    let resolved = template::resolve_map(&record, &ctx.variables);
                    created.push(self.entities.create(&entity, resolved).await?);
                }
                output.insert("count".into(), json!(created.len()));
                output.insert("created".into(), json!(true));
                output.insert("records".into(), json!(created));
            }
            "clone_record" => {
                let record_id = support::require_resolved(node, ctx, "recordId")?;
                let mut cloned = self.entities.clone_record(&entity, &record_id).await?;
                if let Some(overrides) = support::resolved_map(node, ctx, "overrideFields") {
                    if let (Some(target), Some(fields)) =
                        (cloned.as_object_mut(), overrides.as_object())
                    {
                        for (key, value) in fields {
                            target.insert(key.clone(), value.clone());
                        }
                    }
                }
                ctx.set_variable("clonedRecord", cloned.clone());
                output.insert("cloned".into(), json!(true));
                output.insert("record".into(), cloned);
            }
            _ => {
                let fields = support::resolved_map(node, ctx, "fields").ok_or_else(|| {
                    NodeError::ConfigError("create operation requires fields".into())
                })?;
                let record = self.entities.create(&entity, fields).await?;
                ctx.set_variable("createdRecord", record.clone());
                output.insert("created".into(), json!(true));
                output.insert("record".into(), record);
            }
        }
        Ok(ExecutionResult::success_with(output))
    }

    async fn update(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let entity = support::require_resolved(node, ctx, "entity")?;
        let fields = support::resolved_map(node, ctx, "fields")
            .ok_or_else(|| NodeError::ConfigError("update operation requires fields".into()))?;
        let mut output = BTreeMap::new();

        if node.subtype == "update_multiple" {
            let ids = self.target_ids(node, ctx, &entity).await?;
            let mut updated = Vec::with_capacity(ids.len());
            for id in &ids {
                updated.push(self.entities.update(&entity, id, fields.clone()).await?);
            }
            output.insert("count".into(), json!(updated.len()));
            output.insert("records".into(), json!(updated));
        } else {
            let record_id = support::require_resolved(node, ctx, "recordId")?;
            let record = self.entities.update(&entity, &record_id, fields).await?;
            ctx.set_variable("updatedRecord", record.clone());
            output.insert("record".into(), record);
            output.insert("recordId".into(), json!(record_id));
        }
        output.insert("updated".into(), json!(true));
        Ok(ExecutionResult::success_with(output))
    }

    async fn delete(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let entity = support::require_resolved(node, ctx, "entity")?;
        let mut output = BTreeMap::new();

        if node.subtype == "delete_multiple" {
            let ids = self.target_ids(node, ctx, &entity).await?;
            let mut removed = 0;
            for id in &ids {
                if self.entities.delete(&entity, id).await? {
                    removed += 1;
                }
            }
            output.insert("count".into(), json!(removed));
        } else {
            let record_id = support::require_resolved(node, ctx, "recordId")?;
            let removed = self.entities.delete(&entity, &record_id).await?;
            output.insert("recordId".into(), json!(record_id));
            output.insert("found".into(), json!(removed));
        }
        output.insert("deleted".into(), json!(true));
        Ok(ExecutionResult::success_with(output))
    }

    /// Bulk targets come either as an explicit id list or from criteria.
    async fn target_ids(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
        entity: &str,
    ) -> Result<Vec<String>, NodeError> {
        if let Some(ids) = node.config.get("recordIds") {
            return Ok(support::string_items(ids));
        }
        let criteria = support::resolved_map(node, ctx, "criteria")
            .ok_or_else(|| NodeError::ConfigError("bulk operation requires recordIds or criteria".into()))?;
        let records = self
            .entities
            .query(entity, &criteria, Some(DEFAULT_QUERY_LIMIT))
            .await?;
        Ok(records
            .iter()
            .filter_map(|r| r.get("id").map(template::stringify))
            .collect())
    }

    fn field_op(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let field = node
            .config_str("field")
            .ok_or_else(|| NodeError::ConfigError("missing required field: field".into()))?
            .to_string();
        let mut output = BTreeMap::new();

        match node.subtype.as_str() {
            "set_field" => {
                let value = node
                    .config
                    .get("value")
                    .map(|v| template::resolve_map(v, &ctx.variables))
                    .unwrap_or(Value::Null);
                ctx.set_variable(field.clone(), value.clone());
                output.insert("field".into(), json!(field));
                output.insert("value".into(), value);
            }
            "copy_field" => {
                let source = node
                    .config_str("sourceField")
                    .ok_or_else(|| NodeError::ConfigError("missing required field: sourceField".into()))?;
                let value = template::resolve_path(source, &ctx.variables)
                    .cloned()
                    .unwrap_or(Value::Null);
                ctx.set_variable(field.clone(), value);
                output.insert("copiedFrom".into(), json!(source));
                output.insert("field".into(), json!(field));
            }
            "clear_field" => {
                ctx.set_variable(field.clone(), Value::Null);
                output.insert("field".into(), json!(field));
            }
            "increment" | "decrement" => {
                let amount = node.config_f64("amount").unwrap_or(1.0);
                let current = ctx
                    .variable(&field)
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                let next = if node.subtype == "increment" {
                    current + amount
                } else {
                    current - amount
                };
                let next = if next.fract() == 0.0 {
                    json!(next as i64)
                } else {
                    json!(next)
                };
                ctx.set_variable(field.clone(), next.clone());
                output.insert("field".into(), json!(field));
                output.insert("value".into(), next);
            }
            _ => unreachable!("field_op dispatched on checked subtypes"),
        }
        Ok(ExecutionResult::success_with(output))
    }

    async fn assign(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<ExecutionResult, NodeError> {
        if node.subtype == "assign_team" {
            let team = support::require_resolved(node, ctx, "team")?;
            ctx.set_variable("assignedTeamId", json!(team));
            let mut output = BTreeMap::new();
            output.insert("assignedTeam".into(), json!(team));
            return Ok(ExecutionResult::success_with(output));
        }

        // Direct assignee wins over strategy selection.
        if let Some(assignee) = support::resolved(node, ctx, "assignTo") {
            return self.record_owner(node, ctx, &assignee, "DIRECT").await;
        }

        let strategy = node.config_str("strategy").unwrap_or("ROUND_ROBIN").to_string();
        let strategy_config = node
            .config
            .get("strategyConfig")
            .cloned()
            .unwrap_or_else(|| json!({}));

        // The strategy sees the trigger payload plus everything set since.
        let mut record = Map::new();
        if let Some(payload) = ctx.trigger_data.as_object() {
            record.extend(payload.clone());
        }
        record.extend(ctx.variables.clone());

        match self
            .assignment
            .assign(&Value::Object(record), &strategy, &strategy_config)
        {
            Some(owner) => self.record_owner(node, ctx, &owner, &strategy).await,
            None => {
                warn!(strategy, "assignment produced no owner");
                Ok(ExecutionResult::failed("No user available for assignment"))
            }
        }
    }

    async fn record_owner(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
        owner: &str,
        strategy: &str,
    ) -> Result<ExecutionResult, NodeError> {
        let entity = support::require_resolved(node, ctx, "entity")?;
        let record_id = support::require_resolved(node, ctx, "recordId")?;
        self.entities
            .update(&entity, &record_id, json!({"ownerId": owner}))
            .await?;

        ctx.set_variable("assignedUserId", json!(owner));
        ctx.set_variable("assignmentStrategy", json!(strategy));
        info!(owner, strategy, record_id, "record assigned");

        let mut output = BTreeMap::new();
        output.insert("assignedTo".into(), json!(owner));
        output.insert("recordId".into(), json!(record_id));
        output.insert("strategy".into(), json!(strategy));
        Ok(ExecutionResult::success_with(output))
    }
}

#[async_trait]
impl NodeHandler for DataHandler {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        match node.subtype.as_str() {
            "get_records" | "query_database" | "search_records" => self.query(node, ctx).await,
            "create_record" | "create_multiple" | "clone_record" => self.create(node, ctx).await,
            "update_record" | "update_multiple" => self.update(node, ctx).await,
            "delete_record" | "delete_multiple" => self.delete(node, ctx).await,
            "set_field" | "copy_field" | "clear_field" | "increment" | "decrement" => {
                self.field_op(node, ctx)
            }
            "assign_record" | "rotate_owner" | "assign_team" => self.assign(node, ctx).await,
            other => Err(NodeError::UnknownSubtype {
                node_type: node.node_type.to_string(),
                subtype: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::model::NodeType;
    use crate::runtime::RuntimeContext;
    use crate::services::InMemoryEntityStore;

    use super::*;

    fn handler() -> (DataHandler, Arc<InMemoryEntityStore>) {
        let store = Arc::new(InMemoryEntityStore::new(RuntimeContext::fake()));
        let handler = DataHandler::new(store.clone(), Arc::new(AssignmentEngine::new()));
        (handler, store)
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("wf-1", 1, "ex-1", "acme", json!({}))
    }

    #[tokio::test]
    async fn test_create_record_resolves_templates() {
        let (handler, store) = handler();
        let node = Node::new("d1", NodeType::Data, "create_record").with_config(json!({
            "entity": "task",
            "fields": {"title": "Call {{lead.name}}", "status": "OPEN"}
        }));
        let mut ctx = ctx();
        ctx.set_variable("lead", json!({"name": "Ann"}));

        let result = handler.execute(&node, &mut ctx).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.output["record"]["title"], json!("Call Ann"));

        let stored = store.query("task", &json!({}), None).await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_query_stores_results_in_context() {
        let (handler, store) = handler();
        store.seed("lead", json!({"id": "l1", "status": "NEW"}));
        store.seed("lead", json!({"id": "l2", "status": "WON"}));
        let node = Node::new("d1", NodeType::Data, "get_records")
            .with_config(json!({"entity": "lead", "criteria": {"status": "NEW"}}));
        let mut ctx = ctx();

        let result = handler.execute(&node, &mut ctx).await.unwrap();
        assert_eq!(result.output["count"], json!(1));
        assert_eq!(ctx.variable("recordCount"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_increment_defaults_to_one() {
        let (handler, _) = handler();
        let node = Node::new("d1", NodeType::Data, "increment")
            .with_config(json!({"field": "touchCount"}));
        let mut ctx = ctx();
        ctx.set_variable("touchCount", json!(2));

        handler.execute(&node, &mut ctx).await.unwrap();
        assert_eq!(ctx.variable("touchCount"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_assign_record_with_strategy_updates_owner() {
        let (handler, store) = handler();
        store.seed("lead", json!({"id": "l1", "status": "NEW"}));
        let node = Node::new("d1", NodeType::Data, "assign_record").with_config(json!({
            "entity": "lead",
            "recordId": "l1",
            "strategy": "ROUND_ROBIN",
            "strategyConfig": {"teamKey": "sales", "userIds": ["u1", "u2"]}
        }));
        let mut ctx = ctx();

        let result = handler.execute(&node, &mut ctx).await.unwrap();
        assert_eq!(result.output["assignedTo"], json!("u1"));
        let record = store.get("lead", "l1").await.unwrap().unwrap();
        assert_eq!(record["ownerId"], json!("u1"));
    }

    #[tokio::test]
    async fn test_assign_without_candidates_fails_softly() {
        let (handler, store) = handler();
        store.seed("lead", json!({"id": "l1"}));
        let node = Node::new("d1", NodeType::Data, "assign_record").with_config(json!({
            "entity": "lead",
            "recordId": "l1",
            "strategy": "ROUND_ROBIN",
            "strategyConfig": {"userIds": []}
        }));
        let mut ctx = ctx();

        let result = handler.execute(&node, &mut ctx).await.unwrap();
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_delete_reports_missing_record() {
        let (handler, _) = handler();
        let node = Node::new("d1", NodeType::Data, "delete_record")
            .with_config(json!({"entity": "lead", "recordId": "nope"}));
        let mut ctx = ctx();

        let result = handler.execute(&node, &mut ctx).await.unwrap();
        assert_eq!(result.output["found"], json!(false));
    }
}
