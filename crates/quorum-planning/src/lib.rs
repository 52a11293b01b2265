//! Quorum Planning - task decomposition and role prompts
//!
//! A planner turns a task description plus a repository snapshot into one
//! or more subtasks with resolved role sequences. The prompt builder turns
//! a subtask, a role and the conversation so far into the text an agent
//! receives.

pub mod planner;
pub mod prompt;

pub use planner::{Complexity, ExecutionMode, FixedPlanner, HeuristicPlanner, Plan, Planner, SubtaskSpec};
pub use prompt::{DialogueTurn, PromptBuilder, PromptContext, TemplatePromptBuilder};
