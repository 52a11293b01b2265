//! Running roles inside a subtask's environment
//!
//! An `ExecutionUnit` carries everything one task's agent steps need: the
//! registry to provision through, version control to commit with, the
//! caller, the prompt builder, the shared conversation log and the task's
//! cancellation token.

use quorum_agent::{AgentCaller, AgentRequest};
use quorum_consensus::ConversationLog;
use quorum_core::{
    environment_name_for, ConversationEntry, EnvironmentSpec, HandleId, OrchestrationSettings,
    QuorumError, ResourceHandle, Result, Role, RoleAssignment, RoleTimeouts, Subtask, SubtaskId,
    TaskId, Usage,
};
use quorum_planning::{DialogueTurn, PromptBuilder, PromptContext, TemplatePromptBuilder};
use quorum_vcs::VersionControl;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::LifecycleRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtaskStatus {
    Success,
    Failure,
    Timeout,
    Cancelled,
}

impl std::fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskResult {
    pub subtask_id: SubtaskId,
    pub index: usize,
    pub status: SubtaskStatus,
    pub branch_name: String,
    pub handle_id: Option<HandleId>,
    pub reason: Option<String>,
    pub usage: Usage,
}

impl SubtaskResult {
    pub fn new(subtask: &Subtask, status: SubtaskStatus) -> Self {
        Self {
            subtask_id: subtask.id.clone(),
            index: subtask.index,
            status,
            branch_name: subtask.branch_name.clone(),
            handle_id: None,
            reason: None,
            usage: Usage::default(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn succeeded(&self) -> bool {
        self.status == SubtaskStatus::Success
    }
}

/// Why a role step did not produce a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    Cancelled,
    Timeout { role: Role, after: Duration },
    Failed { role: Role, message: String },
}

impl StepError {
    pub fn status(&self) -> SubtaskStatus {
        match self {
            Self::Cancelled => SubtaskStatus::Cancelled,
            Self::Timeout { .. } => SubtaskStatus::Timeout,
            Self::Failed { .. } => SubtaskStatus::Failure,
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::Timeout { role, after } => {
                write!(f, "{} timed out after {}s", role, after.as_secs())
            }
            Self::Failed { role, message } => write!(f, "{} failed: {}", role, message),
        }
    }
}

impl From<StepError> for QuorumError {
    fn from(e: StepError) -> Self {
        match e {
            StepError::Cancelled => QuorumError::Cancelled,
            other => QuorumError::Agent(other.to_string()),
        }
    }
}

/// One successful role step
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub role: Role,
    pub text: String,
    pub usage: Usage,
    /// Position of the appended entry in the conversation log
    pub entry_index: usize,
}

pub struct ExecutionUnit {
    task_id: TaskId,
    task_description: String,
    registry: Arc<LifecycleRegistry>,
    vcs: Arc<dyn VersionControl>,
    caller: Arc<dyn AgentCaller>,
    prompts: Arc<dyn PromptBuilder>,
    log: ConversationLog,
    cancel: CancellationToken,
    base_branch: String,
    environment_prefix: String,
    timeouts: RoleTimeouts,
}

impl ExecutionUnit {
    pub fn new(
        task_id: TaskId,
        task_description: impl Into<String>,
        registry: Arc<LifecycleRegistry>,
        vcs: Arc<dyn VersionControl>,
        caller: Arc<dyn AgentCaller>,
        log: ConversationLog,
        cancel: CancellationToken,
    ) -> Self {
        let defaults = OrchestrationSettings::default();
        Self {
            task_id,
            task_description: task_description.into(),
            registry,
            vcs,
            caller,
            prompts: Arc::new(TemplatePromptBuilder::new()),
            log,
            cancel,
            base_branch: defaults.base_branch,
            environment_prefix: defaults.environment_prefix,
            timeouts: RoleTimeouts::default(),
        }
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptBuilder>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_settings(mut self, settings: &OrchestrationSettings, timeouts: &RoleTimeouts) -> Self {
        self.base_branch = settings.base_branch.clone();
        self.environment_prefix = settings.environment_prefix.clone();
        self.timeouts = timeouts.clone();
        self
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn registry(&self) -> &Arc<LifecycleRegistry> {
        &self.registry
    }

    /// The subtask's assignment for `role`, or a default one with configured timeout
    pub fn assignment_for(&self, subtask: &Subtask, role: Role) -> RoleAssignment {
        subtask
            .roles
            .iter()
            .find(|a| a.role == role)
            .cloned()
            .unwrap_or_else(|| RoleAssignment::new(role).with_timeout(self.timeouts.for_role(role)))
    }

    /// Provision the subtask's environment on its branch and register the handle
    pub async fn acquire(&self, subtask: &Subtask) -> Result<ResourceHandle> {
        let spec = EnvironmentSpec {
            name: environment_name_for(&self.environment_prefix, &self.task_id, subtask.index),
            branch: subtask.branch_name.clone(),
            base_branch: self.base_branch.clone(),
        };
        let handle = self
            .registry
            .acquire(&self.task_id, Some(subtask.id.clone()), &spec)
            .await?;
        info!(
            "Subtask {} running in {} on {}",
            subtask.id, handle.environment.name, handle.branch_name
        );
        Ok(handle)
    }

    /// Invoke one role and append its reply to the conversation
    ///
    /// The role's timeout is a hard limit. Cancellation wins over an
    /// in-flight call.
    pub async fn run_role(
        &self,
        subtask: &Subtask,
        handle: &ResourceHandle,
        assignment: &RoleAssignment,
        round: usize,
        max_rounds: usize,
        dialogue: Option<DialogueTurn>,
    ) -> std::result::Result<StepOutput, StepError> {
        if self.cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }

        let role = assignment.role;
        let is_dialogue = dialogue.is_some();
        let conversation = self.log.entries();
        let prompt = self.prompts.build(&PromptContext {
            task_description: &self.task_description,
            subtask,
            assignment,
            round,
            max_rounds,
            conversation: &conversation,
            dialogue,
        });

        let timeout = assignment.capability.timeout();
        let request = AgentRequest {
            role,
            prompt,
            working_dir: handle.environment.path.clone(),
            timeout,
        };

        debug!("Invoking {} for {} (round {})", role, subtask.id, round);
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => return Err(StepError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.caller.invoke(request)) => outcome,
        };

        let response = match outcome {
            Err(_) => return Err(StepError::Timeout { role, after: timeout }),
            Ok(Err(e)) if e.is_timeout() => return Err(StepError::Timeout { role, after: timeout }),
            Ok(Err(e)) => {
                return Err(StepError::Failed {
                    role,
                    message: e.to_string(),
                })
            }
            Ok(Ok(response)) => response,
        };

        let mut entry = ConversationEntry::new(self.task_id.clone(), role, response.text.clone())
            .with_subtask(subtask.id.clone());
        if is_dialogue {
            entry = entry.as_dialogue();
        }
        let entry_index = self.log.append(entry).await;

        Ok(StepOutput {
            role,
            text: response.text,
            usage: response.usage,
            entry_index,
        })
    }

    /// Commit whatever the agents changed onto the environment's branch
    ///
    /// Returns false when the working tree is clean.
    pub async fn commit(&self, subtask: &Subtask, handle: &ResourceHandle, round: usize) -> Result<bool> {
        let message = format!("quorum: {} round {}", subtask.id, round);
        let committed = self
            .vcs
            .commit_all(&handle.environment.path, &message)
            .await?;

        if committed {
            debug!("Committed {} on {}", subtask.id, handle.branch_name);
        }
        Ok(committed)
    }

    /// Run every role of `subtask` once, in order, in its own environment
    ///
    /// The environment is released before returning; the branch stays.
    pub async fn run_subtask(&self, subtask: &Subtask) -> SubtaskResult {
        if self.cancel.is_cancelled() {
            return SubtaskResult::new(subtask, SubtaskStatus::Cancelled).with_reason("cancelled before start");
        }

        let handle = match self.acquire(subtask).await {
            Ok(handle) => handle,
            Err(e) => {
                return SubtaskResult::new(subtask, SubtaskStatus::Failure).with_reason(e.to_string())
            }
        };

        let mut result = SubtaskResult::new(subtask, SubtaskStatus::Success);
        result.handle_id = Some(handle.id.clone());

        for assignment in &subtask.roles {
            match self.run_role(subtask, &handle, assignment, 1, 1, None).await {
                Ok(step) => result.usage.add(&step.usage),
                Err(e) => {
                    warn!("Subtask {} stopped: {}", subtask.id, e);
                    result.status = e.status();
                    result.reason = Some(e.to_string());
                    break;
                }
            }
        }

        if result.succeeded() {
            if let Err(e) = self.commit(subtask, &handle, 1).await {
                result.status = SubtaskStatus::Failure;
                result.reason = Some(e.to_string());
            }
        }

        self.registry.release(&handle.id).await;
        result
    }
}
