//! CRM record storage seam used by data-operation handlers.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};

use crate::error::NodeError;
use crate::runtime::RuntimeContext;

/// Records are JSON objects keyed by an `id` field the store assigns.
/// `criteria` is an equality match over top-level fields.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn query(
        &self,
        entity: &str,
        criteria: &Value,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, NodeError>;

    async fn get(&self, entity: &str, id: &str) -> Result<Option<Value>, NodeError>;

    async fn create(&self, entity: &str, fields: Value) -> Result<Value, NodeError>;

    async fn update(&self, entity: &str, id: &str, fields: Value) -> Result<Value, NodeError>;

    async fn delete(&self, entity: &str, id: &str) -> Result<bool, NodeError>;

    async fn clone_record(&self, entity: &str, id: &str) -> Result<Value, NodeError>;
}

pub struct InMemoryEntityStore {
    runtime: RuntimeContext,
    records: RwLock<HashMap<String, Vec<Value>>>,
}

impl InMemoryEntityStore {
    pub fn new(runtime: RuntimeContext) -> Self {
        Self {
            runtime,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Preload a record, test setup convenience.
    pub fn seed(&self, entity: &str, record: Value) {
        self.records
            .write()
            .entry(entity.to_string())
            .or_default()
            .push(record);
    }
}

fn matches(record: &Value, criteria: &Value) -> bool {
    match criteria.as_object() {
        Some(wanted) => wanted
            .iter()
            .all(|(key, value)| record.get(key) == Some(value)),
        None => true,
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn query(
        &self,
        entity: &str,
        criteria: &Value,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, NodeError> {
        let guard = self.records.read();
        let mut found: Vec<Value> = guard
            .get(entity)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| matches(r, criteria))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(limit) = limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn get(&self, entity: &str, id: &str) -> Result<Option<Value>, NodeError> {
        let guard = self.records.read();
        Ok(guard.get(entity).and_then(|records| {
            records
                .iter()
                .find(|r| r.get("id").and_then(Value::as_str) == Some(id))
                .cloned()
        }))
    }

    async fn create(&self, entity: &str, fields: Value) -> Result<Value, NodeError> {
        let mut record = match fields {
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(NodeError::TypeError(format!(
                    "record fields must be an object, got {other}"
                )))
            }
        };
        record["id"] = json!(self.runtime.next_id());
        self.records
            .write()
            .entry(entity.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn update(&self, entity: &str, id: &str, fields: Value) -> Result<Value, NodeError> {
        let mut guard = self.records.write();
        let records = guard
            .get_mut(entity)
            .ok_or_else(|| NodeError::ExecutionError(format!("no such entity: {entity}")))?;
        let record = records
            .iter_mut()
            .find(|r| r.get("id").and_then(Value::as_str) == Some(id))
            .ok_or_else(|| NodeError::ExecutionError(format!("{entity} record not found: {id}")))?;

        if let (Some(target), Some(updates)) = (record.as_object_mut(), fields.as_object()) {
            for (key, value) in updates {
                target.insert(key.clone(), value.clone());
            }
        }
        Ok(record.clone())
    }

    async fn delete(&self, entity: &str, id: &str) -> Result<bool, NodeError> {
        let mut guard = self.records.write();
        let Some(records) = guard.get_mut(entity) else {
            return Ok(false);
        };
        let before = records.len();
        records.retain(|r| r.get("id").and_then(Value::as_str) != Some(id));
        Ok(records.len() < before)
    }

    async fn clone_record(&self, entity: &str, id: &str) -> Result<Value, NodeError> {
        let source = self
            .get(entity, id)
            .await?
            .ok_or_else(|| NodeError::ExecutionError(format!("{entity} record not found: {id}")))?;
        self.create(entity, source).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryEntityStore {
        InMemoryEntityStore::new(RuntimeContext::fake())
    }

    #[tokio::test]
    async fn test_create_assigns_id() {
        let store = store();
        let record = store
            .create("LEAD", json!({"name": "Acme"}))
            .await
            .unwrap();
        assert!(record.get("id").is_some());
        assert_eq!(record["name"], "Acme");
    }

    #[tokio::test]
    async fn test_query_equality_criteria_and_limit() {
        let store = store();
        store.seed("LEAD", json!({"id": "1", "status": "NEW"}));
        store.seed("LEAD", json!({"id": "2", "status": "NEW"}));
        store.seed("LEAD", json!({"id": "3", "status": "WON"}));

        let hits = store
            .query("LEAD", &json!({"status": "NEW"}), None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        let capped = store
            .query("LEAD", &json!({"status": "NEW"}), Some(1))
            .await
            .unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = store();
        store.seed("DEAL", json!({"id": "d1", "stage": "OPEN", "amount": 100}));
        let updated = store
            .update("DEAL", "d1", json!({"stage": "WON"}))
            .await
            .unwrap();
        assert_eq!(updated["stage"], "WON");
        assert_eq!(updated["amount"], 100);
    }

    #[tokio::test]
    async fn test_update_missing_record_errors() {
        let store = store();
        store.seed("DEAL", json!({"id": "d1"}));
        assert!(store.update("DEAL", "nope", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_reports_whether_removed() {
        let store = store();
        store.seed("LEAD", json!({"id": "1"}));
        assert!(store.delete("LEAD", "1").await.unwrap());
        assert!(!store.delete("LEAD", "1").await.unwrap());
    }

    #[tokio::test]
    async fn test_clone_gets_fresh_id() {
        let store = store();
        store.seed("LEAD", json!({"id": "1", "name": "Acme"}));
        let copy = store.clone_record("LEAD", "1").await.unwrap();
        assert_eq!(copy["name"], "Acme");
        assert_ne!(copy["id"], "1");
    }
}
