//! Unified error types for Quorum

use thiserror::Error;

use crate::TaskStatus;

/// Unified error type for all Quorum operations
#[derive(Error, Debug)]
pub enum QuorumError {
    // Version control errors
    #[error("git command failed: {0}")]
    GitCommand(String),

    #[error("branch error: {0}")]
    Branch(String),

    // Environment errors
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// The environment was already torn down (an expected race, not a failure)
    #[error("environment already gone: {0}")]
    EnvironmentGone(String),

    #[error("command in environment failed: {0}")]
    Exec(String),

    // Lifecycle errors
    #[error("resource handle already registered: {0}")]
    DuplicateHandle(String),

    #[error("resource handle not found: {0}")]
    HandleNotFound(String),

    // Task errors
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("planning failed: {0}")]
    Planning(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("task cancelled")]
    Cancelled,

    // Persistence errors
    #[error("task store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using QuorumError
pub type Result<T> = std::result::Result<T, QuorumError>;
