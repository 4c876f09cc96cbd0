//! File-backed context persistence
//!
//! Each execution is stored as one pretty-printed JSON file named
//! `<execution id>.json` inside the store directory. Saves write a
//! sibling `.partial` file first and rename it over the target, so a
//! crash mid-write never leaves a truncated snapshot behind.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use pipeline_engine::{ContextSnapshot, ExecutionId};

use crate::error::{Result, ServiceError};
use crate::persistence::ContextPersistence;

const EXTENSION: &str = "json";
const PARTIAL_EXTENSION: &str = "partial";

/// Distinguishes concurrent writes of the same id
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// One JSON file per execution id
///
/// # Example
///
/// ```ignore
/// use pipeline_service::FileContextStore;
///
/// let store = FileContextStore::new(".pipeline/state");
/// store.save_state(ctx.execution_id(), &ctx.snapshot()).await?;
/// let ids = store.list_stored_execution_ids().await?;
/// ```
#[derive(Debug, Clone)]
pub struct FileContextStore {
    dir: PathBuf,
}

impl FileContextStore {
    /// Create a store rooted at `dir`
    ///
    /// The directory is created on the first save.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, execution_id: &ExecutionId) -> Result<PathBuf> {
        let id = execution_id.as_str();
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(ServiceError::InvalidExecutionId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.{EXTENSION}")))
    }
}

#[async_trait]
impl ContextPersistence for FileContextStore {
    async fn save_state(
        &self,
        execution_id: &ExecutionId,
        snapshot: &ContextSnapshot,
    ) -> Result<()> {
        let path = self.path_for(execution_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let content = serde_json::to_string_pretty(snapshot)?;

        let partial = path.with_extension(format!(
            "{EXTENSION}.{}.{PARTIAL_EXTENSION}",
            WRITE_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&partial, content).await?;
        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }
        log::debug!("Saved execution '{}' to {:?}", execution_id, path);
        Ok(())
    }

    async fn load_state(&self, execution_id: &ExecutionId) -> Result<Option<ContextSnapshot>> {
        let path = self.path_for(execution_id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot: ContextSnapshot = serde_json::from_str(&content)?;
        if snapshot.execution_id != *execution_id {
            log::warn!(
                "Snapshot in {:?} records execution '{}', expected '{}'",
                path,
                snapshot.execution_id,
                execution_id
            );
        }
        Ok(Some(snapshot))
    }

    async fn list_stored_execution_ids(&self) -> Result<Vec<ExecutionId>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(false, |e| e == EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(ExecutionId::from(stem));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete_state(&self, execution_id: &ExecutionId) -> Result<bool> {
        let path = self.path_for(execution_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                log::debug!("Deleted execution '{}' from {:?}", execution_id, path);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_engine::{NodeKey, SequenceContext};

    fn sample() -> SequenceContext {
        SequenceContext::empty()
            .put(&NodeKey::<u32>::new("quantity"), 10)
            .and_then(|ctx| ctx.put(&NodeKey::<Vec<String>>::new("tags"), vec!["a".to_string()]))
            .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::new(dir.path().join("state"));
        let ctx = sample();
        let id = ctx.execution_id().clone();

        store.save_state(&id, &ctx.snapshot()).await.unwrap();

        assert!(dir.path().join("state").join(format!("{id}.json")).exists());
        let loaded = store.load_state(&id).await.unwrap().unwrap();
        assert_eq!(loaded, ctx.snapshot());
        assert_eq!(store.list_stored_execution_ids().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_missing_directory_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::new(dir.path().join("never-created"));

        assert!(store.list_stored_execution_ids().await.unwrap().is_empty());
        assert!(store
            .load_state(&ExecutionId::from("nothing"))
            .await
            .unwrap()
            .is_none());
        assert!(!store
            .delete_state(&ExecutionId::from("nothing"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_child_ids_are_valid_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::new(dir.path());
        let child = sample().create_child_context(3);

        store
            .save_state(child.execution_id(), &child.snapshot())
            .await
            .unwrap();
        let ids = store.list_stored_execution_ids().await.unwrap();
        assert_eq!(ids, vec![child.execution_id().clone()]);
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::new(dir.path());
        let snapshot = sample().snapshot();

        for bad in ["../escape", "a/b", "a\\b", ""] {
            let err = store
                .save_state(&ExecutionId::from(bad), &snapshot)
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::InvalidExecutionId(_)));
        }
    }

    #[tokio::test]
    async fn test_save_replaces_whole_file_and_leaves_no_partials() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::new(dir.path());
        let first = sample();
        let id = first.execution_id().clone();
        let second = first
            .put(&NodeKey::<String>::new("status"), "done".to_string())
            .unwrap();

        store.save_state(&id, &first.snapshot()).await.unwrap();
        store.save_state(&id, &second.snapshot()).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{id}.json")]);
        assert_eq!(
            store.load_state(&id).await.unwrap().unwrap(),
            second.snapshot()
        );
    }

    #[tokio::test]
    async fn test_leftover_partial_writes_are_not_listed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContextStore::new(dir.path());
        let ctx = sample();
        store
            .save_state(ctx.execution_id(), &ctx.snapshot())
            .await
            .unwrap();
        std::fs::write(dir.path().join("crashed.json.7.partial"), "{\"executionId\":").unwrap();

        assert_eq!(
            store.list_stored_execution_ids().await.unwrap(),
            vec![ctx.execution_id().clone()]
        );
    }

    #[tokio::test]
    async fn test_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a snapshot").unwrap();
        let store = FileContextStore::new(dir.path());

        assert!(store.list_stored_execution_ids().await.unwrap().is_empty());
    }
}
