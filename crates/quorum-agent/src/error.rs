//! Agent call errors

use quorum_core::QuorumError;
use thiserror::Error;

/// How an agent call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentErrorKind {
    /// Worth retrying: rate limits, server errors, dropped connections
    Transient,
    /// Retrying will not help: bad request, missing credentials, agent crash
    Permanent,
    /// The role's hard wall-clock limit elapsed
    Timeout,
}

impl std::fmt::Display for AgentErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} agent error: {message}")]
pub struct AgentError {
    pub kind: AgentErrorKind,
    pub message: String,
}

impl AgentError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: AgentErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: AgentErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: AgentErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == AgentErrorKind::Transient
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == AgentErrorKind::Timeout
    }
}

impl From<AgentError> for QuorumError {
    fn from(err: AgentError) -> Self {
        QuorumError::Agent(err.to_string())
    }
}
