//! Task decomposition into subtasks

use async_trait::async_trait;
use quorum_core::{QuorumError, RepositorySnapshot, Result, Role, RoleAssignment, RoleTimeouts};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rough size of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// How the orchestrator runs a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One subtask, architect → coder → reviewer round loop
    Sequential,
    /// Several independent subtasks on their own branches, then a merge
    Parallel,
}

/// One planned unit of work, before ids and branches are assigned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub description: String,
    pub roles: Vec<RoleAssignment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub subtasks: Vec<SubtaskSpec>,
    pub complexity: Complexity,
}

impl Plan {
    /// Single subtasks run sequentially; anything larger fans out
    pub fn mode(&self) -> ExecutionMode {
        if self.subtasks.len() > 1 {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.subtasks.is_empty() {
            return Err(QuorumError::Planning("plan has no subtasks".to_string()));
        }
        if let Some(idx) = self.subtasks.iter().position(|s| s.roles.is_empty()) {
            return Err(QuorumError::Planning(format!("subtask {} has no roles", idx)));
        }
        Ok(())
    }
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, description: &str, snapshot: &RepositorySnapshot) -> Result<Plan>;
}

/// Planner that always returns the same plan
#[derive(Debug, Clone)]
pub struct FixedPlanner {
    plan: Plan,
}

impl FixedPlanner {
    pub fn new(plan: Plan) -> Self {
        Self { plan }
    }
}

#[async_trait]
impl Planner for FixedPlanner {
    async fn plan(&self, _description: &str, _snapshot: &RepositorySnapshot) -> Result<Plan> {
        Ok(self.plan.clone())
    }
}

const SPECIALIST_KEYWORDS: [&str; 6] = [
    "security",
    "performance",
    "migration",
    "database",
    "concurrency",
    "cryptograph",
];

const DEFAULT_MAX_SUBTASKS: usize = 4;

/// Splits bullet-list descriptions into independent subtasks
///
/// A description with two or more list items (`- `, `* ` or `1. `) becomes
/// one subtask per item, extras folded into the last one. Anything else is
/// a single subtask. Files from the snapshot mentioned in an item are
/// listed under it.
#[derive(Debug, Clone)]
pub struct HeuristicPlanner {
    timeouts: RoleTimeouts,
    max_subtasks: usize,
}

impl HeuristicPlanner {
    pub fn new(timeouts: RoleTimeouts) -> Self {
        Self {
            timeouts,
            max_subtasks: DEFAULT_MAX_SUBTASKS,
        }
    }

    pub fn with_max_subtasks(mut self, max_subtasks: usize) -> Self {
        self.max_subtasks = max_subtasks.max(1);
        self
    }

    fn list_item(line: &str) -> Option<&str> {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
            return Some(rest.trim());
        }
        let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0 {
            if let Some(rest) = line[digits..].strip_prefix(". ") {
                return Some(rest.trim());
            }
        }
        None
    }

    fn split(&self, description: &str) -> Vec<String> {
        let mut items: Vec<String> = description
            .lines()
            .filter_map(Self::list_item)
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect();

        if items.len() < 2 {
            return vec![description.trim().to_string()];
        }

        if items.len() > self.max_subtasks {
            let rest = items.split_off(self.max_subtasks - 1);
            items.push(rest.join("\n"));
        }
        items
    }

    fn estimate(description: &str, parts: usize) -> Complexity {
        let words = description.split_whitespace().count();
        match (parts, words) {
            (1, w) if w < 40 => Complexity::Low,
            (p, w) if p <= 3 && w < 150 => Complexity::Medium,
            _ => Complexity::High,
        }
    }

    fn roles_for(&self, text: &str) -> Vec<RoleAssignment> {
        let lower = text.to_lowercase();
        let mut roles = vec![Role::Architect, Role::Coder];
        if SPECIALIST_KEYWORDS.iter().any(|k| lower.contains(k)) {
            roles.push(Role::Specialist);
        }
        roles.push(Role::Reviewer);

        roles
            .into_iter()
            .map(|role| RoleAssignment::new(role).with_timeout(self.timeouts.for_role(role)))
            .collect()
    }

    fn related_files<'a>(text: &str, snapshot: &'a RepositorySnapshot) -> Vec<&'a str> {
        snapshot
            .files
            .iter()
            .map(String::as_str)
            .filter(|file| {
                text.contains(file)
                    || file
                        .rsplit('/')
                        .next()
                        .is_some_and(|name| name.contains('.') && text.contains(name))
            })
            .collect()
    }
}

impl Default for HeuristicPlanner {
    fn default() -> Self {
        Self::new(RoleTimeouts::default())
    }
}

#[async_trait]
impl Planner for HeuristicPlanner {
    async fn plan(&self, description: &str, snapshot: &RepositorySnapshot) -> Result<Plan> {
        if description.trim().is_empty() {
            return Err(QuorumError::Planning("task description is empty".to_string()));
        }

        let parts = self.split(description);
        let complexity = Self::estimate(description, parts.len());

        let subtasks = parts
            .into_iter()
            .map(|part| {
                let files = Self::related_files(&part, snapshot);
                let description = if files.is_empty() {
                    part.clone()
                } else {
                    format!("{}\n\nRelated files: {}", part, files.join(", "))
                };
                SubtaskSpec {
                    description,
                    roles: self.roles_for(&part),
                }
            })
            .collect::<Vec<_>>();

        debug!(subtasks = subtasks.len(), ?complexity, "Planned task");
        let plan = Plan {
            subtasks,
            complexity,
        };
        plan.validate()?;
        Ok(plan)
    }
}
