//! Role prompt generation
//!
//! Prompts give an agent everything it needs in one shot:
//! - the task and its subtask
//! - the role's objective and allowed tools
//! - the tail of the conversation so far
//! - a dialogue question to answer, when one is open

use quorum_core::{ConversationEntry, Role, RoleAssignment, Subtask};

/// Conversation entries included in a prompt
const HISTORY_LIMIT: usize = 12;

/// An open question in a direct exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueTurn {
    /// The role this agent is talking to
    pub with: Role,
    pub message: String,
    pub round: usize,
    pub max_rounds: usize,
}

/// Everything a prompt is built from
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub task_description: &'a str,
    pub subtask: &'a Subtask,
    pub assignment: &'a RoleAssignment,
    pub round: usize,
    pub max_rounds: usize,
    pub conversation: &'a [ConversationEntry],
    pub dialogue: Option<DialogueTurn>,
}

pub trait PromptBuilder: Send + Sync {
    fn build(&self, ctx: &PromptContext<'_>) -> String;
}

/// Built-in templates keyed by the capability's template id
#[derive(Debug, Clone, Default)]
pub struct TemplatePromptBuilder;

impl TemplatePromptBuilder {
    pub fn new() -> Self {
        Self
    }

    fn objective(role: Role) -> &'static str {
        match role {
            Role::Architect => {
                "1. Study the repository and the subtask\n\
                 2. Describe the design: files to touch, interfaces, risks\n\
                 3. Do not write code\n"
            }
            Role::Coder => {
                "1. Implement the architect's plan in the working directory\n\
                 2. Keep changes scoped to this subtask\n\
                 3. Summarise what you changed and why\n"
            }
            Role::Specialist => {
                "1. Review the change from your area of expertise\n\
                 2. Fix what you can directly, explain what you cannot\n"
            }
            Role::Reviewer => {
                "1. Review the change against the subtask\n\
                 2. Reply \"Approved\" when it is ready, or list the issues that remain\n\
                 3. Address questions to a role by name, e.g. \"Coder: ...\"\n"
            }
        }
    }
}

impl PromptBuilder for TemplatePromptBuilder {
    fn build(&self, ctx: &PromptContext<'_>) -> String {
        let role = ctx.assignment.role;
        let mut prompt = String::new();

        prompt.push_str(&format!(
            "# QUORUM {} - Round {} of {}\n",
            role.to_string().to_uppercase(),
            ctx.round,
            ctx.max_rounds
        ));
        prompt.push_str(&format!("Template: {}\n\n", ctx.assignment.capability.prompt_template));

        prompt.push_str("## TASK\n\n");
        prompt.push_str(ctx.task_description.trim());
        prompt.push_str("\n\n");

        prompt.push_str(&format!("## SUBTASK {}\n\n", ctx.subtask.index));
        prompt.push_str(ctx.subtask.description.trim());
        prompt.push_str(&format!("\n\nBranch: {}\n\n", ctx.subtask.branch_name));

        prompt.push_str("## ALLOWED TOOLS\n\n");
        prompt.push_str(&ctx.assignment.capability.allowed_tools.join(", "));
        prompt.push_str("\n\n");

        let history = &ctx.conversation[ctx.conversation.len().saturating_sub(HISTORY_LIMIT)..];
        if !history.is_empty() {
            prompt.push_str("## CONVERSATION\n\n");
            for entry in history {
                let marker = if entry.is_dialogue { " (direct)" } else { "" };
                prompt.push_str(&format!("**{}{}:** {}\n\n", entry.speaker, marker, entry.text.trim()));
            }
        }

        match &ctx.dialogue {
            Some(turn) => {
                prompt.push_str(&format!(
                    "## DIRECT EXCHANGE WITH {} ({} of {})\n\n",
                    turn.with.to_string().to_uppercase(),
                    turn.round,
                    turn.max_rounds
                ));
                prompt.push_str(&format!("> {}\n\n", turn.message.trim()));
                prompt.push_str(
                    "Answer directly. Say \"ready to proceed\" once nothing is left open.\n",
                );
            }
            None => {
                prompt.push_str("## OBJECTIVE\n\n");
                prompt.push_str(Self::objective(role));
            }
        }

        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::TaskId;

    fn subtask() -> Subtask {
        Subtask::new(&TaskId::new("t-1"), 0, "Add a helper", vec![RoleAssignment::new(Role::Coder)])
    }

    #[test]
    fn test_round_prompt_contains_sections() {
        let subtask = subtask();
        let assignment = RoleAssignment::new(Role::Reviewer);
        let conversation = vec![ConversationEntry::new(TaskId::new("t-1"), Role::Coder, "Implemented.")];
        let ctx = PromptContext {
            task_description: "Improve helpers",
            subtask: &subtask,
            assignment: &assignment,
            round: 1,
            max_rounds: 3,
            conversation: &conversation,
            dialogue: None,
        };

        let prompt = TemplatePromptBuilder::new().build(&ctx);
        assert!(prompt.starts_with("# QUORUM REVIEWER - Round 1 of 3"));
        assert!(prompt.contains("Branch: quorum/t-1/subtask-0"));
        assert!(prompt.contains("**coder:** Implemented."));
        assert!(prompt.contains("Reply \"Approved\""));
        assert!(prompt.contains("read, search, diff"));
    }

    #[test]
    fn test_dialogue_prompt_replaces_objective() {
        let subtask = subtask();
        let assignment = RoleAssignment::new(Role::Coder);
        let ctx = PromptContext {
            task_description: "Improve helpers",
            subtask: &subtask,
            assignment: &assignment,
            round: 1,
            max_rounds: 3,
            conversation: &[],
            dialogue: Some(DialogueTurn {
                with: Role::Reviewer,
                message: "Why did you use X?".to_string(),
                round: 1,
                max_rounds: 2,
            }),
        };

        let prompt = TemplatePromptBuilder::new().build(&ctx);
        assert!(prompt.contains("## DIRECT EXCHANGE WITH REVIEWER (1 of 2)"));
        assert!(prompt.contains("> Why did you use X?"));
        assert!(!prompt.contains("## OBJECTIVE"));
        assert!(!prompt.contains("## CONVERSATION"));
    }
}
