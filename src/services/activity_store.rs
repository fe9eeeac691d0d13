//! Tasks, events, notes and attachments, keyed by the record they belong to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NodeError;
use crate::runtime::RuntimeContext;

/// A task, calendar event, meeting, note, comment or file attachment.
/// `kind` distinguishes them; `fields` carries the subtype-specific data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub kind: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub fields: Value,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn create(
        &self,
        kind: &str,
        entity_type: Option<&str>,
        entity_id: Option<&str>,
        fields: Value,
    ) -> Result<Activity, NodeError>;

    async fn update(&self, id: &str, fields: Value) -> Result<Activity, NodeError>;

    async fn complete(&self, id: &str) -> Result<Activity, NodeError>;

    async fn get(&self, id: &str) -> Result<Option<Activity>, NodeError>;

    async fn for_record(&self, entity_type: &str, entity_id: &str) -> Vec<Activity>;
}

pub struct InMemoryActivityStore {
    runtime: RuntimeContext,
    activities: RwLock<Vec<Activity>>,
}

impl InMemoryActivityStore {
    pub fn new(runtime: RuntimeContext) -> Self {
        Self {
            runtime,
            activities: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ActivityStore for InMemoryActivityStore {
    async fn create(
        &self,
        kind: &str,
        entity_type: Option<&str>,
        entity_id: Option<&str>,
        fields: Value,
    ) -> Result<Activity, NodeError> {
        let activity = Activity {
            id: self.runtime.next_id(),
            kind: kind.to_string(),
            entity_type: entity_type.map(String::from),
            entity_id: entity_id.map(String::from),
            fields,
            completed: false,
            created_at: self.runtime.now(),
        };
        self.activities.write().push(activity.clone());
        Ok(activity)
    }

    async fn update(&self, id: &str, fields: Value) -> Result<Activity, NodeError> {
        let mut guard = self.activities.write();
        let activity = guard
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| NodeError::ExecutionError(format!("activity not found: {id}")))?;
        if let (Some(target), Some(updates)) = (activity.fields.as_object_mut(), fields.as_object())
        {
            for (key, value) in updates {
                target.insert(key.clone(), value.clone());
            }
        }
        Ok(activity.clone())
    }

    async fn complete(&self, id: &str) -> Result<Activity, NodeError> {
        let mut guard = self.activities.write();
        let activity = guard
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| NodeError::ExecutionError(format!("activity not found: {id}")))?;
        activity.completed = true;
        Ok(activity.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Activity>, NodeError> {
        Ok(self.activities.read().iter().find(|a| a.id == id).cloned())
    }

    async fn for_record(&self, entity_type: &str, entity_id: &str) -> Vec<Activity> {
        self.activities
            .read()
            .iter()
            .filter(|a| {
                a.entity_type.as_deref() == Some(entity_type)
                    && a.entity_id.as_deref() == Some(entity_id)
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_create_and_complete_task() {
        let store = InMemoryActivityStore::new(RuntimeContext::fake());
        let task = store
            .create("task", Some("LEAD"), Some("l1"), json!({"title": "Call"}))
            .await
            .unwrap();
        assert!(!task.completed);

        let done = store.complete(&task.id).await.unwrap();
        assert!(done.completed);
    }

    #[tokio::test]
    async fn test_activities_keyed_by_record() {
        let store = InMemoryActivityStore::new(RuntimeContext::fake());
        store
            .create("note", Some("LEAD"), Some("l1"), json!({"note": "a"}))
            .await
            .unwrap();
        store
            .create("note", Some("LEAD"), Some("l2"), json!({"note": "b"}))
            .await
            .unwrap();

        assert_eq!(store.for_record("LEAD", "l1").await.len(), 1);
        assert!(store.for_record("DEAL", "l1").await.is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_activity_errors() {
        let store = InMemoryActivityStore::new(RuntimeContext::fake());
        assert!(store.update("nope", json!({})).await.is_err());
    }
}
