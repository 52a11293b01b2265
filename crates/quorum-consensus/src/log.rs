//! Append-only conversation log

use async_trait::async_trait;
use quorum_core::{fail_open, ConversationEntry, Result};
use std::sync::{Arc, RwLock};

/// Durable mirror for conversation entries
#[async_trait]
pub trait ConversationSink: Send + Sync {
    async fn record(&self, entry: &ConversationEntry) -> Result<()>;
}

/// Shared handle to one task's conversation
///
/// Clones share the same entries. Insertion order is the only ordering
/// guarantee; parallel workers may interleave.
#[derive(Clone, Default)]
pub struct ConversationLog {
    entries: Arc<RwLock<Vec<ConversationEntry>>>,
    sink: Option<Arc<dyn ConversationSink>>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror every appended entry to `sink`; sink failures are logged only
    pub fn with_sink(mut self, sink: Arc<dyn ConversationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Append an entry, returning its index
    pub async fn append(&self, entry: ConversationEntry) -> usize {
        let index = {
            let mut entries = self
                .entries
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            entries.push(entry.clone());
            entries.len() - 1
        };

        if let Some(sink) = &self.sink {
            fail_open("conversation_sink", || sink.record(&entry)).await;
        }

        index
    }

    /// Snapshot of all entries in insertion order
    pub fn entries(&self) -> Vec<ConversationEntry> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ConversationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationLog")
            .field("len", &self.len())
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::{QuorumError, Role, TaskId};
    use std::sync::Mutex;

    struct RecordingSink {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ConversationSink for RecordingSink {
        async fn record(&self, entry: &ConversationEntry) -> Result<()> {
            if self.fail {
                return Err(QuorumError::Store("disk full".to_string()));
            }
            self.seen.lock().unwrap().push(entry.text.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_append_preserves_order_across_clones() {
        let log = ConversationLog::new();
        let other = log.clone();
        let task = TaskId::new("t-1");

        assert_eq!(log.append(ConversationEntry::new(task.clone(), Role::Architect, "a")).await, 0);
        assert_eq!(other.append(ConversationEntry::new(task, Role::Coder, "b")).await, 1);

        let texts: Vec<_> = log.entries().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert_eq!(other.len(), 2);
    }

    #[tokio::test]
    async fn test_sink_mirrors_entries() {
        let sink = Arc::new(RecordingSink {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let log = ConversationLog::new().with_sink(sink.clone());
        log.append(ConversationEntry::new(TaskId::new("t-1"), Role::Reviewer, "Approved"))
            .await;
        assert_eq!(*sink.seen.lock().unwrap(), vec!["Approved"]);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_lose_entry() {
        let sink = Arc::new(RecordingSink {
            seen: Mutex::new(Vec::new()),
            fail: true,
        });
        let log = ConversationLog::new().with_sink(sink);
        log.append(ConversationEntry::new(TaskId::new("t-1"), Role::Coder, "x"))
            .await;
        assert_eq!(log.len(), 1);
    }
}
