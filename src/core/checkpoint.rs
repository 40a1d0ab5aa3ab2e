//! 检查点：队列、历史、配置的一致快照
//!
//! 内存中为只追加列表；可选地整体写入 JSON 文件（与对话持久化同样的单文件格式）。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::OrchestratorConfig;
use crate::core::ExecutionHistoryEntry;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCheckpoint<R> {
    pub id: String,
    pub session_id: String,
    pub iteration: u32,
    pub created_at: DateTime<Utc>,
    pub queue: Vec<R>,
    pub history: Vec<ExecutionHistoryEntry>,
    pub config: OrchestratorConfig,
}

/// 只追加的检查点列表
#[derive(Debug)]
pub struct CheckpointStore<R> {
    checkpoints: Vec<Arc<ExecutionCheckpoint<R>>>,
}

impl<R> CheckpointStore<R> {
    pub fn new() -> Self {
        Self {
            checkpoints: Vec::new(),
        }
    }

    pub fn push(&mut self, checkpoint: Arc<ExecutionCheckpoint<R>>) {
        self.checkpoints.push(checkpoint);
    }

    pub fn get(&self, id: &str) -> Option<Arc<ExecutionCheckpoint<R>>> {
        self.checkpoints.iter().find(|c| c.id == id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<ExecutionCheckpoint<R>>> {
        self.checkpoints.clone()
    }

    pub fn latest(&self) -> Option<Arc<ExecutionCheckpoint<R>>> {
        self.checkpoints.last().cloned()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

impl<R> Default for CheckpointStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// 检查点文件：单文件 JSON 数组
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件不存在时返回空列表
    pub fn load<R: DeserializeOwned>(&self) -> anyhow::Result<Vec<ExecutionCheckpoint<R>>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// 覆盖写入；父目录不存在时自动创建
    pub fn save<R: Serialize>(&self, checkpoints: &[Arc<ExecutionCheckpoint<R>>]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let list: Vec<&ExecutionCheckpoint<R>> = checkpoints.iter().map(|c| c.as_ref()).collect();
        std::fs::write(&self.path, serde_json::to_string_pretty(&list)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::PromptRequest;

    fn checkpoint(id: &str, iteration: u32) -> Arc<ExecutionCheckpoint<PromptRequest>> {
        Arc::new(ExecutionCheckpoint {
            id: id.to_string(),
            session_id: "s-1".into(),
            iteration,
            created_at: Utc::now(),
            queue: vec![PromptRequest::new("t-2", "next")],
            history: vec![ExecutionHistoryEntry::begin("s-1", iteration, 1, "t-1", "first")],
            config: OrchestratorConfig::default(),
        })
    }

    #[test]
    fn test_store_lookup() {
        let mut store = CheckpointStore::new();
        assert!(store.latest().is_none());
        store.push(checkpoint("a", 1));
        store.push(checkpoint("b", 2));

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a").unwrap().iteration, 1);
        assert_eq!(store.latest().unwrap().id, "b");
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_file_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = CheckpointFile::new(dir.path().join("nested").join("checkpoints.json"));

        let saved = vec![checkpoint("a", 1), checkpoint("b", 2)];
        file.save(&saved).unwrap();

        let loaded: Vec<ExecutionCheckpoint<PromptRequest>> = file.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(&loaded[1], saved[1].as_ref());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = CheckpointFile::new(dir.path().join("none.json"));
        let loaded: Vec<ExecutionCheckpoint<PromptRequest>> = file.load().unwrap();
        assert!(loaded.is_empty());
    }
}
