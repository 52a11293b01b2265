//! # quorum-core
//!
//! Core types for the Quorum multi-agent orchestration system.
//!
//! Quorum runs architect, coder, reviewer and specialist agents against a
//! repository. Every agent step happens inside a disposable environment bound
//! to its own branch, and the orchestrator decides from the conversation when
//! the agents agree.
//!
//! ## Core Paradigm
//!
//! - A task owns subtasks, and every subtask owns exactly one branch
//! - Environments are resource handles with exactly-once release
//! - Agent agreement is read from the conversation, never assumed
//! - Parallel branches are folded back deterministically, conflicts escalate

pub mod bounded;
pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use bounded::{bounded_iterate, Backoff, Bounded};
pub use fail_open::fail_open;
pub use config::{
    AgentSettings, CallerKind, OrchestrationSettings, PhraseSets, QuorumConfig, RoleTimeouts,
};
pub use error::{QuorumError, Result};
pub use types::*;
