//! The agent-call seam

use async_trait::async_trait;
use quorum_core::{Role, Usage};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::AgentError;
use crate::types::{AgentRequest, AgentResponse};

/// Anything that can answer a prompt on behalf of a role
#[async_trait]
pub trait AgentCaller: Send + Sync {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentError>;
}

/// Caller that replays canned replies per role (for tests and dry runs)
///
/// Each role has a queue of replies consumed in order; once a queue is
/// empty the role's fallback reply is used, if any.
#[derive(Default)]
pub struct ScriptedCaller {
    scripts: Mutex<HashMap<Role, VecDeque<Result<String, AgentError>>>>,
    fallbacks: HashMap<Role, String>,
    delays: HashMap<Role, Duration>,
    usage: Usage,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedCaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `role`
    pub fn reply(self, role: Role, text: impl Into<String>) -> Self {
        self.push(role, Ok(text.into()))
    }

    /// Queue a failure for `role`
    pub fn fail(self, role: Role, error: AgentError) -> Self {
        self.push(role, Err(error))
    }

    /// Reply used once `role`'s queue is exhausted
    pub fn fallback(mut self, role: Role, text: impl Into<String>) -> Self {
        self.fallbacks.insert(role, text.into());
        self
    }

    /// Sleep before every reply for `role`
    pub fn delay(mut self, role: Role, delay: Duration) -> Self {
        self.delays.insert(role, delay);
        self
    }

    /// Usage reported by every call
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    fn push(self, role: Role, reply: Result<String, AgentError>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(role)
            .or_default()
            .push_back(reply);
        self
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Roles called, in order
    pub fn call_order(&self) -> Vec<Role> {
        self.requests().iter().map(|r| r.role).collect()
    }
}

#[async_trait]
impl AgentCaller for ScriptedCaller {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let role = request.role;
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);

        if let Some(delay) = self.delays.get(&role) {
            tokio::time::sleep(*delay).await;
        }

        let next = self
            .scripts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_mut(&role)
            .and_then(|queue| queue.pop_front());

        let text = match next {
            Some(reply) => reply?,
            None => self
                .fallbacks
                .get(&role)
                .cloned()
                .ok_or_else(|| AgentError::permanent(format!("no scripted reply for {}", role)))?,
        };

        Ok(AgentResponse {
            text,
            usage: self.usage,
            duration_ms: 0,
        })
    }
}
