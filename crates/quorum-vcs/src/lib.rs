//! # quorum-vcs
//!
//! Git integration layer for Quorum orchestration.
//!
//! This crate provides:
//! - Git command execution abstraction (real and mock executors)
//! - The `VersionControl` operations the provisioner and merger build on
//! - Conflict marker and porcelain status parsing

mod backend;
mod command;
pub mod conflicts;

pub use backend::{GitBackend, MergeAttempt, VersionControl, WorktreeInfo};
pub use command::{GitCommand, GitExecutor, GitOutput, MockGitExecutor};
pub use conflicts::{count_conflict_hunks, parse_conflict_hunks, parse_unmerged_paths, ConflictHunk};
