//! Configuration management for Quorum
//!
//! Repository-level settings live in `.quorum/config.toml`: orchestration
//! limits, per-role timeouts, agent caller selection and the phrase sets the
//! consensus engine classifies with.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{QuorumError, Result, Role};

/// Repository-level Quorum configuration
///
/// Loaded from `.quorum/config.toml` in the repo root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuorumConfig {
    #[serde(default)]
    pub orchestration: OrchestrationSettings,

    #[serde(default)]
    pub timeouts: RoleTimeouts,

    #[serde(default)]
    pub agent: AgentSettings,

    /// Consensus phrase sets
    #[serde(default)]
    pub phrases: PhraseSets,
}

/// Orchestration limits and naming
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationSettings {
    /// Sequential round-loop limit
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Round-trips allowed in one direct dialogue
    #[serde(default = "default_max_dialogue_rounds")]
    pub max_dialogue_rounds: usize,

    /// Parallel subtasks in flight at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Conversation entries the consensus engine looks back over
    #[serde(default = "default_lookback")]
    pub lookback: usize,

    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Prefix of every environment name; orphan sweeps match on it
    #[serde(default = "default_environment_prefix")]
    pub environment_prefix: String,

    /// Seconds between graceful and forced termination of a timed-out agent
    #[serde(default = "default_termination_grace_secs")]
    pub termination_grace_secs: u64,
}

/// Per-role hard wall-clock timeouts in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleTimeouts {
    #[serde(default = "default_role_timeout")]
    pub architect: u64,
    #[serde(default = "default_role_timeout")]
    pub coder: u64,
    #[serde(default = "default_role_timeout")]
    pub reviewer: u64,
    #[serde(default = "default_role_timeout")]
    pub specialist: u64,
}

/// Which agent-call collaborator to build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerKind {
    #[default]
    Anthropic,
    Cli,
}

/// Agent caller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default)]
    pub caller: CallerKind,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable containing API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Attempts for transient agent errors, first call included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Program and arguments for the CLI caller; the prompt goes to stdin
    #[serde(default = "default_cli_command")]
    pub cli_command: Vec<String>,
}

/// Phrase sets driving the consensus classifiers
///
/// Matching is case-insensitive substring matching. Negated phrases are
/// removed from the text before their positive counterparts are searched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhraseSets {
    #[serde(default = "default_approval")]
    pub approval: Vec<String>,
    #[serde(default = "default_rejection")]
    pub rejection: Vec<String>,
    #[serde(default = "default_issue")]
    pub issue: Vec<String>,
    #[serde(default = "default_resolved")]
    pub resolved: Vec<String>,
    #[serde(default = "default_ready")]
    pub ready: Vec<String>,
    #[serde(default = "default_not_ready")]
    pub not_ready: Vec<String>,
    /// Phrasings that address the previous speaker directly
    #[serde(default = "default_direct_address")]
    pub direct_address: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// Default value providers
fn default_max_rounds() -> usize {
    3
}

fn default_max_dialogue_rounds() -> usize {
    2
}

fn default_max_concurrency() -> usize {
    4
}

fn default_lookback() -> usize {
    4
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_environment_prefix() -> String {
    "quorum".to_string()
}

fn default_termination_grace_secs() -> u64 {
    5
}

fn default_role_timeout() -> u64 {
    crate::RoleCapability::DEFAULT_TIMEOUT_SECS
}

fn default_model() -> String {
    "claude-sonnet-4".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_max_tokens() -> usize {
    16000
}

fn default_max_attempts() -> usize {
    3
}

fn default_cli_command() -> Vec<String> {
    strings(&["claude", "-p"])
}

fn default_approval() -> Vec<String> {
    strings(&["approved", "lgtm", "looks good", "ship it", "ready to merge"])
}

fn default_rejection() -> Vec<String> {
    strings(&[
        "not approved",
        "cannot approve",
        "can't approve",
        "changes requested",
        "request changes",
        "needs changes",
        "needs work",
        "rejected",
        "not ready to merge",
    ])
}

fn default_issue() -> Vec<String> {
    strings(&[
        "issue",
        "bug",
        "problem",
        "broken",
        "fails",
        "failing",
        "incorrect",
        "missing",
        "must fix",
        "needs to be fixed",
        "concern",
    ])
}

fn default_resolved() -> Vec<String> {
    strings(&[
        "no remaining issues",
        "no further issues",
        "all issues resolved",
        "issues resolved",
        "no issues",
        "no problems",
        "no concerns",
        "nothing missing",
    ])
}

fn default_ready() -> Vec<String> {
    strings(&[
        "ready to proceed",
        "let's proceed",
        "sounds good",
        "makes sense",
        "agreed",
        "understood",
        "that clarifies",
        "no further questions",
        "good to go",
    ])
}

fn default_not_ready() -> Vec<String> {
    strings(&[
        "not ready",
        "not sure",
        "unclear",
        "i disagree",
        "hold on",
        "still confused",
        "doesn't make sense",
    ])
}

fn default_direct_address() -> Vec<String> {
    strings(&[
        "i'm not sure why you",
        "why did you",
        "why do you",
        "can you",
        "could you",
        "would you",
        "did you",
        "have you",
        "please explain",
        "please clarify",
    ])
}

impl QuorumConfig {
    /// Load configuration from `.quorum/config.toml` or use defaults
    pub fn load_or_default(repo_root: &Path) -> Result<Self> {
        let config_path = repo_root.join(".quorum/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)
                .map_err(|e| QuorumError::Config(format!("Failed to parse config file: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject limits that would leave nothing to run
    pub fn validate(&self) -> Result<()> {
        let o = &self.orchestration;
        for (name, value) in [
            ("max_rounds", o.max_rounds),
            ("max_dialogue_rounds", o.max_dialogue_rounds),
            ("max_concurrency", o.max_concurrency),
            ("lookback", o.lookback),
            ("agent.max_attempts", self.agent.max_attempts),
        ] {
            if value == 0 {
                return Err(QuorumError::Config(format!("{} must be at least 1", name)));
            }
        }
        if o.environment_prefix.is_empty() {
            return Err(QuorumError::Config("environment_prefix must not be empty".to_string()));
        }
        Ok(())
    }

    /// Write default configuration to `.quorum/config.toml`
    pub fn write_default(repo_root: &Path) -> Result<()> {
        let config_dir = repo_root.join(".quorum");
        std::fs::create_dir_all(&config_dir)?;

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| QuorumError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(config_dir.join("config.toml"), content)?;
        Ok(())
    }
}

impl RoleTimeouts {
    pub fn for_role(&self, role: Role) -> Duration {
        let secs = match role {
            Role::Architect => self.architect,
            Role::Coder => self.coder,
            Role::Reviewer => self.reviewer,
            Role::Specialist => self.specialist,
        };
        Duration::from_secs(secs)
    }
}

impl OrchestrationSettings {
    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_secs)
    }
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_dialogue_rounds: default_max_dialogue_rounds(),
            max_concurrency: default_max_concurrency(),
            lookback: default_lookback(),
            base_branch: default_base_branch(),
            environment_prefix: default_environment_prefix(),
            termination_grace_secs: default_termination_grace_secs(),
        }
    }
}

impl Default for RoleTimeouts {
    fn default() -> Self {
        Self {
            architect: default_role_timeout(),
            coder: default_role_timeout(),
            reviewer: default_role_timeout(),
            specialist: default_role_timeout(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            caller: CallerKind::default(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            max_attempts: default_max_attempts(),
            cli_command: default_cli_command(),
        }
    }
}

impl Default for PhraseSets {
    fn default() -> Self {
        Self {
            approval: default_approval(),
            rejection: default_rejection(),
            issue: default_issue(),
            resolved: default_resolved(),
            ready: default_ready(),
            not_ready: default_not_ready(),
            direct_address: default_direct_address(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = QuorumConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.orchestration.max_dialogue_rounds, 2);
        assert_eq!(config.orchestration.max_concurrency, 4);
        assert_eq!(config.timeouts.for_role(Role::Coder), Duration::from_secs(300));
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        QuorumConfig::write_default(dir.path()).unwrap();
        assert!(dir.path().join(".quorum/config.toml").exists());

        let config = QuorumConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.phrases, PhraseSets::default());
        assert_eq!(config.agent.cli_command, vec!["claude", "-p"]);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".quorum")).unwrap();
        std::fs::write(
            dir.path().join(".quorum/config.toml"),
            "[orchestration]\nmax_concurrency = 8\n\n[timeouts]\nreviewer = 60\n\n[phrases]\napproval = [\"ship it\"]\n",
        )
        .unwrap();

        let config = QuorumConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.orchestration.max_concurrency, 8);
        assert_eq!(config.orchestration.max_rounds, 3);
        assert_eq!(config.timeouts.for_role(Role::Reviewer), Duration::from_secs(60));
        assert_eq!(config.phrases.approval, vec!["ship it"]);
        assert_eq!(config.phrases.issue, default_issue());
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".quorum")).unwrap();
        std::fs::write(dir.path().join(".quorum/config.toml"), "orchestration = 3").unwrap();
        assert!(matches!(
            QuorumConfig::load_or_default(dir.path()),
            Err(QuorumError::Config(_))
        ));
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        assert!(QuorumConfig::default().validate().is_ok());

        let mut config = QuorumConfig::default();
        config.orchestration.max_dialogue_rounds = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "configuration error: max_dialogue_rounds must be at least 1");

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".quorum")).unwrap();
        std::fs::write(
            dir.path().join(".quorum/config.toml"),
            "[orchestration]\nmax_rounds = 0\n",
        )
        .unwrap();
        assert!(matches!(
            QuorumConfig::load_or_default(dir.path()),
            Err(QuorumError::Config(_))
        ));
    }
}
