//! Durable task records
//!
//! The file store keeps one JSON document per task plus a JSONL
//! conversation log beside it:
//!
//! ```text
//! .quorum/tasks/<task-id>.json
//! .quorum/tasks/<task-id>.conversation.jsonl
//! ```

use async_trait::async_trait;
use quorum_consensus::ConversationSink;
use quorum_core::{ConversationEntry, QuorumError, Result, TaskId};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::task::Task;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save(&self, task: &Task) -> Result<()>;

    async fn load(&self, id: &TaskId) -> Result<Option<Task>>;

    async fn list(&self) -> Result<Vec<TaskId>>;

    async fn append_conversation(&self, entry: &ConversationEntry) -> Result<()>;

    async fn conversation(&self, id: &TaskId) -> Result<Vec<ConversationEntry>>;
}

/// Routes a conversation log into a task store
pub struct StoreSink(pub Arc<dyn TaskStore>);

#[async_trait]
impl ConversationSink for StoreSink {
    async fn record(&self, entry: &ConversationEntry) -> Result<()> {
        self.0.append_conversation(entry).await
    }
}

pub struct FileTaskStore {
    dir: PathBuf,
}

impl FileTaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at `<repo>/.quorum/tasks`
    pub fn for_repo(repo_root: &Path) -> Self {
        Self::new(repo_root.join(".quorum").join("tasks"))
    }

    fn record_path(&self, id: &TaskId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn conversation_path(&self, id: &TaskId) -> PathBuf {
        self.dir.join(format!("{}.conversation.jsonl", id))
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn save(&self, task: &Task) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(task)?;

        // write-then-rename so readers never see a half-written record
        let path = self.record_path(&task.id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!("Saved task {} ({})", task.id, task.status());
        Ok(())
    }

    async fn load(&self, id: &TaskId) -> Result<Option<Task>> {
        match tokio::fs::read(self.record_path(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<TaskId>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(TaskId::new(id));
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn append_conversation(&self, entry: &ConversationEntry) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.conversation_path(&entry.task_id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn conversation(&self, id: &TaskId) -> Result<Vec<ConversationEntry>> {
        let content = match tokio::fs::read_to_string(self.conversation_path(id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    QuorumError::Store(format!("conversation line {} for {}: {}", n + 1, id, e))
                })
            })
            .collect()
    }
}

#[derive(Default)]
struct MemoryState {
    tasks: BTreeMap<TaskId, Task>,
    conversations: HashMap<TaskId, Vec<ConversationEntry>>,
    saves: usize,
}

/// In-process store (for tests and dry runs)
#[derive(Default)]
pub struct MemoryTaskStore {
    state: Mutex<MemoryState>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save` calls so far
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn save(&self, task: &Task) -> Result<()> {
        let mut state = self.lock();
        state.saves += 1;
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn load(&self, id: &TaskId) -> Result<Option<Task>> {
        Ok(self.lock().tasks.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<TaskId>> {
        Ok(self.lock().tasks.keys().cloned().collect())
    }

    async fn append_conversation(&self, entry: &ConversationEntry) -> Result<()> {
        self.lock()
            .conversations
            .entry(entry.task_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn conversation(&self, id: &TaskId) -> Result<Vec<ConversationEntry>> {
        Ok(self.lock().conversations.get(id).cloned().unwrap_or_default())
    }
}
