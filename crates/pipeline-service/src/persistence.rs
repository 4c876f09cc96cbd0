//! Checkpoint storage for execution contexts

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use pipeline_engine::{ContextSnapshot, ExecutionId};

use crate::error::Result;

/// Storage backend for execution snapshots
///
/// Implementations may target the file system, a database or an object
/// store. Saving an id that is already stored replaces it.
#[async_trait]
pub trait ContextPersistence: Send + Sync {
    /// Store the snapshot of one execution
    async fn save_state(&self, execution_id: &ExecutionId, snapshot: &ContextSnapshot)
        -> Result<()>;

    /// Load a stored snapshot, or `None` if the id was never saved
    async fn load_state(&self, execution_id: &ExecutionId) -> Result<Option<ContextSnapshot>>;

    /// Every execution id currently stored
    async fn list_stored_execution_ids(&self) -> Result<Vec<ExecutionId>>;

    /// Remove a stored snapshot; returns whether one existed
    async fn delete_state(&self, execution_id: &ExecutionId) -> Result<bool>;
}

/// Process-local store, mostly useful for tests
#[derive(Debug, Default)]
pub struct InMemoryContextStore {
    snapshots: RwLock<HashMap<ExecutionId, ContextSnapshot>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

#[async_trait]
impl ContextPersistence for InMemoryContextStore {
    async fn save_state(
        &self,
        execution_id: &ExecutionId,
        snapshot: &ContextSnapshot,
    ) -> Result<()> {
        self.snapshots
            .write()
            .insert(execution_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load_state(&self, execution_id: &ExecutionId) -> Result<Option<ContextSnapshot>> {
        Ok(self.snapshots.read().get(execution_id).cloned())
    }

    async fn list_stored_execution_ids(&self) -> Result<Vec<ExecutionId>> {
        let mut ids: Vec<ExecutionId> = self.snapshots.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete_state(&self, execution_id: &ExecutionId) -> Result<bool> {
        Ok(self.snapshots.write().remove(execution_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_engine::{NodeKey, SequenceContext};

    #[tokio::test]
    async fn test_save_load_list_delete() {
        let store = InMemoryContextStore::new();
        let ctx = SequenceContext::from_initial_input(42_u32).unwrap();
        let id = ctx.execution_id().clone();

        assert!(store.load_state(&id).await.unwrap().is_none());

        store.save_state(&id, &ctx.snapshot()).await.unwrap();
        let loaded = store.load_state(&id).await.unwrap().unwrap();
        assert_eq!(loaded, ctx.snapshot());
        assert_eq!(store.list_stored_execution_ids().await.unwrap(), vec![id.clone()]);

        assert!(store.delete_state(&id).await.unwrap());
        assert!(!store.delete_state(&id).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_save_replaces_existing() {
        let store = InMemoryContextStore::new();
        let key: NodeKey<String> = NodeKey::new("status");
        let first = SequenceContext::empty()
            .put(&key, "pending".to_string())
            .unwrap();
        let second = first.remove(&key).put(&key, "done".to_string()).unwrap();
        let id = first.execution_id().clone();

        store.save_state(&id, &first.snapshot()).await.unwrap();
        store.save_state(&id, &second.snapshot()).await.unwrap();

        assert_eq!(store.len(), 1);
        let loaded = store.load_state(&id).await.unwrap().unwrap();
        assert_eq!(loaded.entries[0].value, serde_json::json!("done"));
    }
}
