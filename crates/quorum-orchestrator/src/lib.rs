//! # quorum-orchestrator
//!
//! Task lifecycle engine for Quorum.
//!
//! This crate provides:
//! - The task state machine and persisted task records
//! - Environment provisioning and the resource handle registry
//! - Role execution with hard timeouts and cancellation
//! - Direct dialogues, bounded parallel fan-out and branch merging
//! - Cleanup on SIGINT, SIGTERM and main-thread panics

mod dialogue;
mod execution;
mod merger;
mod orchestrator;
mod parallel;
mod provisioner;
mod registry;
mod signals;
mod state_machine;
mod store;
mod task;

#[cfg(test)]
mod testing;

pub use dialogue::{DialogueOutcome, DialogueSession};
pub use execution::{ExecutionUnit, StepError, StepOutput, SubtaskResult, SubtaskStatus};
pub use merger::BranchMerger;
pub use orchestrator::{Collaborators, Orchestrator};
pub use parallel::{ParallelEngine, ParallelReport};
pub use provisioner::{
    default_worktree_root, EnvironmentProvisioner, MemoryProvisioner, WorktreeProvisioner,
};
pub use registry::{CleanupFailure, LifecycleRegistry, ReleaseOutcome, ReleaseReport};
pub use signals::{
    handle_termination, install_panic_hook, install_termination_handlers, release_all_blocking,
    TerminationCause,
};
pub use state_machine::{is_valid_transition, TaskStateMachine};
pub use store::{FileTaskStore, MemoryTaskStore, StoreSink, TaskStore};
pub use task::{DialogueRecord, Task};
