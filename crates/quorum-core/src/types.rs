//! Core type definitions for Quorum orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::{QuorumError, Result};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh short identifier
            pub fn generate() -> Self {
                Self(format!("{}-{}", $prefix, &Uuid::new_v4().simple().to_string()[..8]))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Task identifier (`t-1a2b3c4d`)
    TaskId,
    "t"
);
string_id!(
    /// Subtask identifier, derived from the parent task and index
    SubtaskId,
    "s"
);
string_id!(
    /// Resource handle identifier
    HandleId,
    "h"
);

impl SubtaskId {
    /// Deterministic subtask id for `index` within `task`
    pub fn for_index(task: &TaskId, index: usize) -> Self {
        Self(format!("{}-s{}", task, index))
    }
}

/// Task status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Created,
    Planning,
    Provisioning,
    Executing,
    Reviewing,
    Merging,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 9] = [
        Self::Created,
        Self::Planning,
        Self::Provisioning,
        Self::Executing,
        Self::Reviewing,
        Self::Merging,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Planning => write!(f, "planning"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::Executing => write!(f, "executing"),
            Self::Reviewing => write!(f, "reviewing"),
            Self::Merging => write!(f, "merging"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "planning" => Ok(Self::Planning),
            "provisioning" => Ok(Self::Provisioning),
            "executing" => Ok(Self::Executing),
            "reviewing" => Ok(Self::Reviewing),
            "merging" => Ok(Self::Merging),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

/// One recorded status change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// Agent roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Architect,
    Coder,
    Reviewer,
    Specialist,
}

impl Role {
    pub const ALL: [Role; 4] = [Self::Architect, Self::Coder, Self::Reviewer, Self::Specialist];

    /// Names an agent may use when addressing this role
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Architect => &["architect", "designer"],
            Self::Coder => &["coder", "developer", "implementer"],
            Self::Reviewer => &["reviewer"],
            Self::Specialist => &["specialist", "expert"],
        }
    }

    /// Default capability descriptor for this role
    pub fn capability(&self) -> RoleCapability {
        let (tools, template): (&[&str], &str) = match self {
            Self::Architect => (&["read", "search"], "architect.v1"),
            Self::Coder => (&["read", "search", "write", "edit", "bash"], "coder.v1"),
            Self::Reviewer => (&["read", "search", "diff"], "reviewer.v1"),
            Self::Specialist => (&["read", "search", "write", "edit"], "specialist.v1"),
        };
        RoleCapability {
            allowed_tools: tools.iter().map(|t| t.to_string()).collect(),
            prompt_template: template.to_string(),
            timeout_secs: RoleCapability::DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Architect => write!(f, "architect"),
            Self::Coder => write!(f, "coder"),
            Self::Reviewer => write!(f, "reviewer"),
            Self::Specialist => write!(f, "specialist"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|role| role.aliases().contains(&lower.as_str()))
            .ok_or_else(|| format!("Invalid role: {}", s))
    }
}

/// What a role is allowed to do and how it is prompted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCapability {
    pub allowed_tools: Vec<String>,
    pub prompt_template: String,
    /// Hard wall-clock limit for one agent call
    pub timeout_secs: u64,
}

impl RoleCapability {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A role with its capability resolved once, at planning time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role: Role,
    pub capability: RoleCapability,
}

impl RoleAssignment {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            capability: role.capability(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.capability.timeout_secs = timeout.as_secs();
        self
    }
}

/// Token usage reported by an agent call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Reference to a provisioned execution environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentRef {
    /// Environment name; carries the owner prefix used by orphan sweeps
    pub name: String,
    /// Working directory inside the environment
    pub path: PathBuf,
}

/// What to provision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSpec {
    pub name: String,
    pub branch: String,
    pub base_branch: String,
}

/// Output of a command run inside an environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Resource handle lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleState {
    Active,
    Released,
}

/// One environment paired with one branch, owned by one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub id: HandleId,
    pub owner_task_id: TaskId,
    /// The in-flight subtask holding this handle, if any
    pub owner_subtask_id: Option<SubtaskId>,
    pub environment: EnvironmentRef,
    pub branch_name: String,
    pub created_at: DateTime<Utc>,
    pub state: HandleState,
}

impl ResourceHandle {
    pub fn new(
        owner_task_id: TaskId,
        owner_subtask_id: Option<SubtaskId>,
        environment: EnvironmentRef,
        branch_name: impl Into<String>,
    ) -> Self {
        Self {
            id: HandleId::generate(),
            owner_task_id,
            owner_subtask_id,
            environment,
            branch_name: branch_name.into(),
            created_at: Utc::now(),
            state: HandleState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == HandleState::Active
    }
}

/// Branch assigned to subtask `index` of `task`
pub fn branch_name_for(task: &TaskId, index: usize) -> String {
    format!("quorum/{}/subtask-{}", task, index)
}

/// Integration branch used when folding a task's parallel branches
pub fn integration_branch_for(task: &TaskId) -> String {
    format!("quorum/{}/integration", task)
}

/// Environment name for subtask `index` of `task` (`{prefix}-{task}-{index}`)
pub fn environment_name_for(prefix: &str, task: &TaskId, index: usize) -> String {
    format!("{}-{}-{}", prefix, task, index)
}

/// Environment name for the integration worktree of `task`
pub fn integration_environment_for(prefix: &str, task: &TaskId) -> String {
    format!("{}-{}-integration", prefix, task)
}

/// One planner-assigned unit of agent work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    pub parent_task_id: TaskId,
    pub index: usize,
    pub description: String,
    /// Executed strictly in order
    pub roles: Vec<RoleAssignment>,
    pub branch_name: String,
    pub handle_id: Option<HandleId>,
}

impl Subtask {
    pub fn new(
        parent_task_id: &TaskId,
        index: usize,
        description: impl Into<String>,
        roles: Vec<RoleAssignment>,
    ) -> Self {
        Self {
            id: SubtaskId::for_index(parent_task_id, index),
            parent_task_id: parent_task_id.clone(),
            index,
            description: description.into(),
            roles,
            branch_name: branch_name_for(parent_task_id, index),
            handle_id: None,
        }
    }

    pub fn resolve_handle(&mut self, handle_id: HandleId) {
        self.handle_id = Some(handle_id);
    }
}

/// One message in a task's conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub task_id: TaskId,
    pub subtask_id: Option<SubtaskId>,
    pub speaker: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Part of a direct sub-exchange between two roles
    pub is_dialogue: bool,
}

impl ConversationEntry {
    pub fn new(task_id: TaskId, speaker: Role, text: impl Into<String>) -> Self {
        Self {
            task_id,
            subtask_id: None,
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
            is_dialogue: false,
        }
    }

    pub fn with_subtask(mut self, subtask_id: SubtaskId) -> Self {
        self.subtask_id = Some(subtask_id);
        self
    }

    pub fn as_dialogue(mut self) -> Self {
        self.is_dialogue = true;
        self
    }
}

/// Outcome class of a branch fold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStatus {
    Clean,
    Conflicted,
}

/// Result of folding a task's parallel branches together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    pub task_id: TaskId,
    pub base_branch: String,
    /// Branches folded successfully, in fold order
    pub merged_branches: Vec<String>,
    pub status: MergeStatus,
    /// Sorted, non-empty exactly when conflicted
    pub conflicted_files: Vec<String>,
    /// Set only for clean merges
    pub merged_branch_name: Option<String>,
    /// Partially integrated branch left for human resolution
    pub partial_branch: Option<String>,
    /// The conflicting branch followed by every branch not yet folded
    pub unmerged_branches: Vec<String>,
    /// Conflict marker hunks per conflicted file
    #[serde(default)]
    pub conflict_hunks: BTreeMap<String, usize>,
}

impl MergeResult {
    pub fn clean(
        task_id: TaskId,
        base_branch: impl Into<String>,
        merged_branches: Vec<String>,
        merged_branch_name: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            base_branch: base_branch.into(),
            merged_branches,
            status: MergeStatus::Clean,
            conflicted_files: Vec::new(),
            merged_branch_name: Some(merged_branch_name.into()),
            partial_branch: None,
            unmerged_branches: Vec::new(),
            conflict_hunks: BTreeMap::new(),
        }
    }

    /// Build a conflicted result; fails if `conflicted_files` is empty
    pub fn conflicted(
        task_id: TaskId,
        base_branch: impl Into<String>,
        merged_branches: Vec<String>,
        conflicted_files: impl IntoIterator<Item = String>,
        partial_branch: impl Into<String>,
        unmerged_branches: Vec<String>,
    ) -> Result<Self> {
        let files: BTreeSet<String> = conflicted_files.into_iter().collect();
        if files.is_empty() {
            return Err(QuorumError::Other(
                "a conflicted merge must name at least one file".to_string(),
            ));
        }

        Ok(Self {
            task_id,
            base_branch: base_branch.into(),
            merged_branches,
            status: MergeStatus::Conflicted,
            conflicted_files: files.into_iter().collect(),
            merged_branch_name: None,
            partial_branch: Some(partial_branch.into()),
            unmerged_branches,
            conflict_hunks: BTreeMap::new(),
        })
    }

    pub fn with_conflict_hunks(mut self, hunks: BTreeMap<String, usize>) -> Self {
        self.conflict_hunks = hunks;
        self
    }

    pub fn is_conflicted(&self) -> bool {
        self.status == MergeStatus::Conflicted
    }

    /// Human-readable summary for terminal task reasons
    pub fn summary(&self) -> String {
        match self.status {
            MergeStatus::Clean => format!(
                "merged {} branch(es) into {}",
                self.merged_branches.len(),
                self.merged_branch_name.as_deref().unwrap_or("?")
            ),
            MergeStatus::Conflicted => format!(
                "merge conflict in [{}]; unmerged branches: [{}]; partial integration on {}",
                self.conflicted_files.join(", "),
                self.unmerged_branches.join(", "),
                self.partial_branch.as_deref().unwrap_or("?")
            ),
        }
    }
}

/// Repository view handed to the planner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    pub root: PathBuf,
    pub head_branch: String,
    pub files: Vec<String>,
}
