//! Task status transitions
//!
//! The transition table is a pure function with no I/O. `TaskStateMachine`
//! wraps it with a transition history so a persisted task can be audited
//! after the fact.

use chrono::Utc;
use quorum_core::{QuorumError, Result, TaskStatus, TransitionRecord};
use serde::{Deserialize, Serialize};

/// Whether a task may move from `from` to `to`
///
/// Forward path: created → planning → provisioning → executing → reviewing,
/// then either merging → completed or straight to completed. Reviewing may
/// go back to executing for another round. Any non-terminal status may fail
/// or be cancelled. Terminal statuses never move.
pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;

    if from.is_terminal() {
        return false;
    }

    matches!(
        (from, to),
        (Created, Planning)
            | (Planning, Provisioning)
            | (Provisioning, Executing)
            | (Executing, Reviewing)
            | (Reviewing, Executing)
            | (Reviewing, Merging)
            | (Reviewing, Completed)
            | (Merging, Completed)
            | (_, Failed)
            | (_, Cancelled)
    )
}

/// Current status plus every transition taken to reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStateMachine {
    status: TaskStatus,
    history: Vec<TransitionRecord>,
}

impl TaskStateMachine {
    pub fn new() -> Self {
        Self {
            status: TaskStatus::Created,
            history: Vec::new(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// Move to `to`, recording the step; invalid moves leave the state untouched
    pub fn transition(&mut self, to: TaskStatus, note: Option<String>) -> Result<&TransitionRecord> {
        if !is_valid_transition(self.status, to) {
            return Err(QuorumError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        self.history.push(TransitionRecord {
            from: self.status,
            to,
            at: Utc::now(),
            note,
        });
        self.status = to;

        Ok(&self.history[self.history.len() - 1])
    }

    /// Whether `history` is a contiguous walk of valid transitions from `created`
    pub fn is_valid_walk(history: &[TransitionRecord]) -> bool {
        let mut current = TaskStatus::Created;
        for record in history {
            if record.from != current || !is_valid_transition(record.from, record.to) {
                return false;
            }
            current = record.to;
        }
        true
    }
}

impl Default for TaskStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
