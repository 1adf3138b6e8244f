use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{AppError, Result};
use crate::state::WorkflowState;

/// Key-value persistence for run state, keyed by `run_id`.
///
/// Runs are single-writer (the controller), so last-writer-wins at
/// full-record granularity is sufficient.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, run_id: &str) -> Result<Option<WorkflowState>>;
    async fn set(&self, run_id: &str, state: &WorkflowState) -> Result<()>;
    async fn list_run_ids(&self) -> Result<Vec<String>>;
}

/// In-memory store for tests and one-shot CLI runs.
#[derive(Default)]
pub struct MemoryStore {
    runs: RwLock<HashMap<String, WorkflowState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, run_id: &str) -> Result<Option<WorkflowState>> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }

    async fn set(&self, run_id: &str, state: &WorkflowState) -> Result<()> {
        self.runs
            .write()
            .await
            .insert(run_id.to_string(), state.clone());
        Ok(())
    }

    async fn list_run_ids(&self) -> Result<Vec<String>> {
        Ok(self.runs.read().await.keys().cloned().collect())
    }
}

/// File-backed store: one JSON document per run under `data_dir`.
///
/// Writes go through a temp file + rename so a crash mid-write never
/// leaves a torn record behind.
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    pub async fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;
        Ok(Self { data_dir })
    }

    fn path_for(&self, run_id: &str) -> Result<PathBuf> {
        // Run ids become file names; reject anything that could escape data_dir.
        if run_id.is_empty()
            || !run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AppError::Store(format!("Invalid run id: {run_id:?}")));
        }
        Ok(self.data_dir.join(format!("{run_id}.json")))
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn get(&self, run_id: &str) -> Result<Option<WorkflowState>> {
        let path = self.path_for(run_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let state = serde_json::from_slice(&bytes)?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, run_id: &str, state: &WorkflowState) -> Result<()> {
        let path = self.path_for(run_id)?;
        let json = serde_json::to_vec_pretty(state)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn list_run_ids(&self) -> Result<Vec<String>> {
        let mut run_ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = file_stem(&path) {
                    run_ids.push(stem);
                }
            }
        }
        Ok(run_ids)
    }
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RunStatus;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.get("run-1").await.unwrap().is_none());

        let mut state = WorkflowState::new("run-1", "task");
        store.set("run-1", &state).await.unwrap();

        state.status = RunStatus::NeedsTest;
        store.set("run-1", &state).await.unwrap();

        let loaded = store.get("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::NeedsTest);
        assert_eq!(loaded.task_description, "task");
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path()).await.unwrap();

        let state = WorkflowState::new("run-abc", "write an add function");
        store.set("run-abc", &state).await.unwrap();

        let loaded = store.get("run-abc").await.unwrap().unwrap();
        assert_eq!(loaded.run_id, "run-abc");
        assert_eq!(loaded.status, RunStatus::NeedsRequirements);

        let ids = store.list_run_ids().await.unwrap();
        assert_eq!(ids, vec!["run-abc".to_string()]);
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_traversal_run_id() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path()).await.unwrap();

        let state = WorkflowState::new("../evil", "task");
        assert!(store.set("../evil", &state).await.is_err());
        assert!(store.get("").await.is_err());
    }

    #[tokio::test]
    async fn test_file_store_missing_run_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path()).await.unwrap();
        assert!(store.get("nope").await.unwrap().is_none());
    }
}
