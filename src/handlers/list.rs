//! List membership and tagging, stored as records in the entity store so
//! they survive suspensions the same way CRM records do.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::engine::NodeHandler;
use crate::error::NodeError;
use crate::model::{ExecutionContext, ExecutionResult, Node};
use crate::services::EntityStore;

use super::support;

const MEMBERSHIP_ENTITY: &str = "list_membership";
const TAG_ENTITY: &str = "record_tag";
const DEFAULT_RECORD_TYPE: &str = "Lead";

pub struct ListHandler {
    entities: Arc<dyn EntityStore>,
}

impl ListHandler {
    pub fn new(entities: Arc<dyn EntityStore>) -> Self {
        Self { entities }
    }

    fn record_type(node: &Node, ctx: &ExecutionContext) -> String {
        support::resolved(node, ctx, "recordType")
            .unwrap_or_else(|| DEFAULT_RECORD_TYPE.to_string())
    }

    async fn add_to_list(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let record_id = support::require_resolved(node, ctx, "recordId")?;
        let list_id = support::require_resolved(node, ctx, "listId")?;
        let record_type = Self::record_type(node, ctx);

        // Idempotent: adding an existing member is a no-op.
        let existing = self.membership(&record_id, &list_id).await?;
        if existing.is_none() {
            self.entities
                .create(
                    MEMBERSHIP_ENTITY,
                    json!({
                        "listId": list_id,
                        "recordId": record_id,
                        "recordType": record_type,
                    }),
                )
                .await?;
        }

        let mut output = BTreeMap::new();
        output.insert("listId".into(), json!(list_id));
        output.insert("recordId".into(), json!(record_id));
        output.insert("added".into(), json!(existing.is_none()));
        Ok(ExecutionResult::success_with(output))
    }

    async fn remove_from_list(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let record_id = support::require_resolved(node, ctx, "recordId")?;
        let list_id = support::require_resolved(node, ctx, "listId")?;

        let removed = match self.membership(&record_id, &list_id).await? {
            Some(id) => self.entities.delete(MEMBERSHIP_ENTITY, &id).await?,
            None => false,
        };

        let mut output = BTreeMap::new();
        output.insert("listId".into(), json!(list_id));
        output.insert("recordId".into(), json!(record_id));
        output.insert("removed".into(), json!(removed));
        Ok(ExecutionResult::success_with(output))
    }

    async fn add_tag(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let record_id = support::require_resolved(node, ctx, "recordId")?;
        let tag = support::require_resolved(node, ctx, "tag")?;
        let record_type = Self::record_type(node, ctx);

        let existing = self.tag_entry(&record_id, &tag).await?;
        if existing.is_none() {
            self.entities
                .create(
                    TAG_ENTITY,
                    json!({
                        "tag": tag,
                        "recordId": record_id,
                        "recordType": record_type,
                    }),
                )
                .await?;
        }

        let mut output = BTreeMap::new();
        output.insert("tag".into(), json!(tag));
        output.insert("recordId".into(), json!(record_id));
        output.insert("added".into(), json!(existing.is_none()));
        Ok(ExecutionResult::success_with(output))
    }

    async fn remove_tag(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let record_id = support::require_resolved(node, ctx, "recordId")?;
        let tag = support::require_resolved(node, ctx, "tag")?;

        let removed = match self.tag_entry(&record_id, &tag).await? {
            Some(id) => self.entities.delete(TAG_ENTITY, &id).await?,
            None => false,
        };

        let mut output = BTreeMap::new();
        output.insert("tag".into(), json!(tag));
        output.insert("recordId".into(), json!(record_id));
        output.insert("removed".into(), json!(removed));
        Ok(ExecutionResult::success_with(output))
    }

    async fn membership(&self, record_id: &str, list_id: &str) -> Result<Option<String>, NodeError> {
        let matches = self
            .entities
            .query(
                MEMBERSHIP_ENTITY,
                &json!({"recordId": record_id, "listId": list_id}),
                Some(1),
            )
            .await?;
        Ok(matches
            .first()
            .and_then(|m| m.get("id"))
            .and_then(Value::as_str)
            .map(String::from))
    }

    async fn tag_entry(&self, record_id: &str, tag: &str) -> Result<Option<String>, NodeError> {
        let matches = self
            .entities
            .query(TAG_ENTITY, &json!({"recordId": record_id, "tag": tag}), Some(1))
            .await?;
        Ok(matches
            .first()
            .and_then(|m| m.get("id"))
            .and_then(Value::as_str)
            .map(String::from))
    }
}

#[async_trait]
impl NodeHandler for ListHandler {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        match node.subtype.as_str() {
            "add_to_list" => self.add_to_list(node, ctx).await,
            "remove_from_list" => self.remove_from_list(node, ctx).await,
            "add_tag" => self.add_tag(node, ctx).await,
            "remove_tag" => self.remove_tag(node, ctx).await,
            other => Err(NodeError::UnknownSubtype {
                node_type: node.node_type.to_string(),
                subtype: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::model::NodeType;
    use crate::runtime::RuntimeContext;
    use crate::services::InMemoryEntityStore;

    use super::*;

    fn setup() -> (ListHandler, Arc<InMemoryEntityStore>, ExecutionContext) {
        let store = Arc::new(InMemoryEntityStore::new(RuntimeContext::fake()));
        let handler = ListHandler::new(store.clone());
        let ctx = ExecutionContext::new("wf-1", 1, "ex-1", "acme", json!({}));
        (handler, store, ctx)
    }

    #[tokio::test]
    async fn test_add_to_list_is_idempotent() {
        let (handler, store, mut ctx) = setup();
        let node = Node::new("l1", NodeType::List, "add_to_list")
            .with_config(json!({"recordId": "r1", "listId": "hot-leads"}));

        let first = handler.execute(&node, &mut ctx).await.unwrap();
        assert_eq!(first.output["added"], json!(true));

        let second = handler.execute(&node, &mut ctx).await.unwrap();
        assert_eq!(second.output["added"], json!(false));

        let members = store
            .query(
                MEMBERSHIP_ENTITY,
                &json!({"recordId": "r1", "listId": "hot-leads"}),
                None,
            )
            .await
            .unwrap();
        assert_eq!(members.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_from_list_reports_absence() {
        let (handler, _, mut ctx) = setup();
        let node = Node::new("l1", NodeType::List, "remove_from_list")
            .with_config(json!({"recordId": "r1", "listId": "hot-leads"}));

        let result = handler.execute(&node, &mut ctx).await.unwrap();
        assert_eq!(result.output["removed"], json!(false));
    }

    #[tokio::test]
    async fn test_tag_round_trip() {
        let (handler, _, mut ctx) = setup();
        let add = Node::new("l1", NodeType::List, "add_tag")
            .with_config(json!({"recordId": "r1", "tag": "vip"}));
        let remove = Node::new("l2", NodeType::List, "remove_tag")
            .with_config(json!({"recordId": "r1", "tag": "vip"}));

        handler.execute(&add, &mut ctx).await.unwrap();
        let result = handler.execute(&remove, &mut ctx).await.unwrap();
        assert_eq!(result.output["removed"], json!(true));
    }
}
