//! The task aggregate and its persisted record

use chrono::{DateTime, Utc};
use quorum_core::{
    HandleId, MergeResult, Result, Role, Subtask, TaskId, TaskStatus, TransitionRecord, Usage,
};
use quorum_planning::{Complexity, ExecutionMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::execution::SubtaskResult;
use crate::state_machine::TaskStateMachine;

/// One direct exchange that ran during the task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueRecord {
    pub round: usize,
    pub asker: Role,
    pub addressee: Role,
    pub reason: String,
    /// Dialogue rounds actually run
    pub rounds: usize,
    pub consensus: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub repository: PathBuf,
    pub created_at: DateTime<Utc>,
    state: TaskStateMachine,
    pub mode: Option<ExecutionMode>,
    pub complexity: Option<Complexity>,
    pub subtasks: Vec<Subtask>,
    pub resource_handle_ids: Vec<HandleId>,
    /// Sequential rounds run
    pub rounds: usize,
    pub dialogues: Vec<DialogueRecord>,
    pub subtask_results: Vec<SubtaskResult>,
    pub merge_result: Option<MergeResult>,
    pub usage: Usage,
    /// Why the task ended, once it has
    pub terminal_reason: Option<String>,
}

impl Task {
    pub fn new(id: TaskId, description: impl Into<String>, repository: impl Into<PathBuf>) -> Self {
        Self {
            id,
            description: description.into(),
            repository: repository.into(),
            created_at: Utc::now(),
            state: TaskStateMachine::new(),
            mode: None,
            complexity: None,
            subtasks: Vec::new(),
            resource_handle_ids: Vec::new(),
            rounds: 0,
            dialogues: Vec::new(),
            subtask_results: Vec::new(),
            merge_result: None,
            usage: Usage::default(),
            terminal_reason: None,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.state.status()
    }

    pub fn history(&self) -> &[TransitionRecord] {
        self.state.history()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn transition(&mut self, to: TaskStatus, note: Option<String>) -> Result<()> {
        let reason = note.clone();
        self.state.transition(to, note)?;
        if to.is_terminal() {
            self.terminal_reason = reason;
        }
        Ok(())
    }

    /// Move to `failed` unless already terminal
    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.is_terminal() {
            let _ = self.transition(TaskStatus::Failed, Some(reason.into()));
        }
    }

    /// Move to `cancelled` unless already terminal
    pub fn cancel(&mut self, reason: impl Into<String>) {
        if !self.is_terminal() {
            let _ = self.transition(TaskStatus::Cancelled, Some(reason.into()));
        }
    }

    pub fn record_handle(&mut self, handle_id: HandleId) {
        if !self.resource_handle_ids.contains(&handle_id) {
            self.resource_handle_ids.push(handle_id);
        }
    }

    pub fn add_usage(&mut self, usage: &Usage) {
        self.usage.add(usage);
    }
}
