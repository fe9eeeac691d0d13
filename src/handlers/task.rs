//! Tasks, events, notes and file attachments recorded against CRM records.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::engine::NodeHandler;
use crate::error::NodeError;
use crate::model::{ExecutionContext, ExecutionResult, Node};
use crate::services::ActivityStore;

use super::support;

pub struct TaskHandler {
    activities: Arc<dyn ActivityStore>,
}

impl TaskHandler {
    pub fn new(activities: Arc<dyn ActivityStore>) -> Self {
        Self { activities }
    }

    fn record_ref(node: &Node, ctx: &ExecutionContext) -> (Option<String>, Option<String>) {
        let entity_type = support::resolved(node, ctx, "recordType");
        let entity_id = support::resolved(node, ctx, "recordId");
        (entity_type, entity_id)
    }

    async fn create(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
        kind: &str,
    ) -> Result<ExecutionResult, NodeError> {
        let mut fields = Map::new();
        for key in [
            "title",
            "description",
            "assignTo",
            "dueDate",
            "priority",
            "startDate",
            "endDate",
            "location",
        ] {
            if let Some(value) = support::resolved(node, ctx, key) {
                fields.insert(key.to_string(), json!(value));
            }
        }
        let (entity_type, entity_id) = Self::record_ref(node, ctx);
        let activity = self
            .activities
            .create(
                kind,
                entity_type.as_deref(),
                entity_id.as_deref(),
                Value::Object(fields),
            )
            .await?;
        info!(kind, activity_id = %activity.id, "activity created");
        ctx.set_variable("createdTaskId", json!(activity.id));

        let mut output = BTreeMap::new();
        output.insert("taskId".into(), json!(activity.id));
        output.insert("kind".into(), json!(kind));
        Ok(ExecutionResult::success_with(output))
    }

    async fn update(&self, node: &Node, ctx: &ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let task_id = support::require_resolved(node, ctx, "taskId")?;
        let updates = support::resolved_map(node, ctx, "fields").unwrap_or_else(|| json!({}));
        let activity = self.activities.update(&task_id, updates).await?;

        let mut output = BTreeMap::new();
        output.insert("taskId".into(), json!(activity.id));
        output.insert("updated".into(), json!(true));
        Ok(ExecutionResult::success_with(output))
    }

    async fn complete(&self, node: &Node, ctx: &ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let task_id = support::require_resolved(node, ctx, "taskId")?;
        let activity = self.activities.complete(&task_id).await?;

        let mut output = BTreeMap::new();
        output.insert("taskId".into(), json!(activity.id));
        output.insert("completed".into(), json!(true));
        Ok(ExecutionResult::success_with(output))
    }

    async fn assign(&self, node: &Node, ctx: &ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let task_id = support::require_resolved(node, ctx, "taskId")?;
        let assignee = support::require_resolved(node, ctx, "assignTo")?;
        self.activities
            .update(&task_id, json!({"assignTo": assignee}))
            .await?;

        let mut output = BTreeMap::new();
        output.insert("taskId".into(), json!(task_id));
        output.insert("assignedTo".into(), json!(assignee));
        Ok(ExecutionResult::success_with(output))
    }

    async fn note(&self, node: &Node, ctx: &ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let record_id = support::require_resolved(node, ctx, "recordId")?;
        let text = support::resolved(node, ctx, "note")
            .or_else(|| support::resolved(node, ctx, "comment"))
            .ok_or_else(|| NodeError::ConfigError("missing required field: note".into()))?;
        let entity_type = support::resolved(node, ctx, "recordType");
        let kind = if node.subtype == "add_comment" {
            "comment"
        } else {
            "note"
        };
        let activity = self
            .activities
            .create(
                kind,
                entity_type.as_deref(),
                Some(&record_id),
                json!({"text": text}),
            )
            .await?;

        let mut output = BTreeMap::new();
        output.insert("noteId".into(), json!(activity.id));
        output.insert("recordId".into(), json!(record_id));
        Ok(ExecutionResult::success_with(output))
    }

    async fn attach(&self, node: &Node, ctx: &ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let record_id = support::require_resolved(node, ctx, "recordId")?;
        let file_ref = support::resolved(node, ctx, "fileUrl")
            .or_else(|| support::resolved(node, ctx, "fileId"))
            .ok_or_else(|| NodeError::ConfigError("missing required field: fileUrl".into()))?;
        let file_name =
            support::resolved(node, ctx, "fileName").unwrap_or_else(|| file_ref.clone());
        let entity_type = support::resolved(node, ctx, "recordType");
        let activity = self
            .activities
            .create(
                "attachment",
                entity_type.as_deref(),
                Some(&record_id),
                json!({"file": file_ref, "fileName": file_name.clone()}),
            )
            .await?;

        let mut output = BTreeMap::new();
        output.insert("attachmentId".into(), json!(activity.id));
        output.insert("fileName".into(), json!(file_name));
        Ok(ExecutionResult::success_with(output))
    }
}

#[async_trait]
impl NodeHandler for TaskHandler {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        match node.subtype.as_str() {
            "create_task" | "create_activity" => self.create(node, ctx, "task").await,
            "create_event" | "create_meeting" => self.create(node, ctx, "event").await,
            "update_task" => self.update(node, ctx).await,
            "complete_task" => self.complete(node, ctx).await,
            "assign_task" => self.assign(node, ctx).await,
            "add_note" | "add_comment" => self.note(node, ctx).await,
            "attach_file" => self.attach(node, ctx).await,
            other => Err(NodeError::UnknownSubtype {
                node_type: node.node_type.to_string(),
                subtype: other.to_string(),
            }),
        }
    }
}
