//! Consensus engine
//!
//! Pure functions over a slice of conversation entries. Nothing here calls
//! an agent or mutates the log; the orchestrator asks and acts.

use quorum_core::{ConversationEntry, PhraseSets, QuorumError, Result, Role};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::phrases::PhraseMatcher;

pub const DEFAULT_LOOKBACK: usize = 4;
const MIN_LOOKBACK: usize = 2;
const MAX_LOOKBACK: usize = 5;

/// A message in the lookback window that addresses another role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedQuestion {
    pub from: Role,
    pub to: Role,
    /// Index of the asking entry in the log
    pub index: usize,
    pub text: String,
}

/// Two roles that should talk directly before the round loop resumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueRequest {
    /// The asker
    pub agent_a: Role,
    /// The addressee, who replies first
    pub agent_b: Role,
    pub reason: String,
    pub question_index: usize,
}

/// Whether agents should keep collaborating, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaborationDecision {
    pub should_continue: bool,
    pub reason: String,
}

impl CollaborationDecision {
    fn proceed(reason: impl Into<String>) -> Self {
        Self {
            should_continue: true,
            reason: reason.into(),
        }
    }

    fn stop(reason: impl Into<String>) -> Self {
        Self {
            should_continue: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    matcher: PhraseMatcher,
    lookback: usize,
    mentions: Vec<(Role, Regex)>,
}

/// `@alias` anywhere, or `alias:` / `alias,` opening a line
fn mention_regex(role: Role) -> Result<Regex> {
    let aliases = role
        .aliases()
        .iter()
        .map(|a| regex::escape(a))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = format!(r"(?im)(?:@(?:{a})\b|^\s*(?:{a})\s*[:,])", a = aliases);
    Regex::new(&pattern).map_err(|e| QuorumError::Other(format!("mention pattern: {}", e)))
}

impl ConsensusEngine {
    /// Build an engine; `lookback` is clamped to 2..=5
    pub fn new(phrases: &PhraseSets, lookback: usize) -> Result<Self> {
        let mentions = Role::ALL
            .into_iter()
            .map(|role| mention_regex(role).map(|r| (role, r)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            matcher: PhraseMatcher::new(phrases)?,
            lookback: lookback.clamp(MIN_LOOKBACK, MAX_LOOKBACK),
            mentions,
        })
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    pub fn matcher(&self) -> &PhraseMatcher {
        &self.matcher
    }

    fn window_start(&self, entries: &[ConversationEntry]) -> usize {
        entries.len().saturating_sub(self.lookback)
    }

    fn latest_from<'a>(&self, entries: &'a [ConversationEntry], role: Role) -> Option<&'a ConversationEntry> {
        entries[self.window_start(entries)..]
            .iter()
            .rev()
            .find(|e| e.speaker == role)
    }

    /// Role explicitly named in `text`, earliest mention first
    fn mentioned_role(&self, text: &str, speaker: Role) -> Option<Role> {
        self.mentions
            .iter()
            .filter(|(role, _)| *role != speaker)
            .filter_map(|(role, regex)| regex.find(text).map(|m| (m.start(), *role)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, role)| role)
    }

    fn addressee(&self, entries: &[ConversationEntry], index: usize) -> Option<Role> {
        let entry = &entries[index];

        if let Some(role) = self.mentioned_role(&entry.text, entry.speaker) {
            return Some(role);
        }

        if self.matcher.addresses_directly(&entry.text) || entry.text.contains('?') {
            return entries[..index]
                .iter()
                .rev()
                .find(|prev| prev.speaker != entry.speaker)
                .map(|prev| prev.speaker);
        }

        None
    }

    /// Newest entry in the window that addresses another role
    pub fn detect_question_to_agent(&self, entries: &[ConversationEntry]) -> Option<DetectedQuestion> {
        (self.window_start(entries)..entries.len())
            .rev()
            .find_map(|index| {
                self.addressee(entries, index).map(|to| DetectedQuestion {
                    from: entries[index].speaker,
                    to,
                    index,
                    text: entries[index].text.clone(),
                })
            })
    }

    /// The latest reviewer entry in the window approves
    pub fn is_approved(&self, entries: &[ConversationEntry]) -> bool {
        self.latest_from(entries, Role::Reviewer)
            .is_some_and(|e| self.matcher.is_approved(&e.text))
    }

    /// The latest reviewer entry in the window reports open issues
    pub fn has_unresolved_issues(&self, entries: &[ConversationEntry]) -> bool {
        self.latest_from(entries, Role::Reviewer)
            .is_some_and(|e| self.matcher.has_unresolved_issues(&e.text))
    }

    /// The latest entry signals readiness
    pub fn is_ready_to_proceed(&self, entries: &[ConversationEntry]) -> bool {
        entries
            .last()
            .is_some_and(|e| self.matcher.is_ready(&e.text))
    }

    pub fn should_continue_collaboration(&self, entries: &[ConversationEntry]) -> CollaborationDecision {
        let decision = self.decide(entries);
        debug!(
            "Consensus over {} entries: continue={} ({})",
            entries.len(),
            decision.should_continue,
            decision.reason
        );
        decision
    }

    fn decide(&self, entries: &[ConversationEntry]) -> CollaborationDecision {
        let Some(latest) = entries.last() else {
            return CollaborationDecision::proceed("no conversation yet");
        };

        let from_reviewer = latest.speaker == Role::Reviewer;
        if from_reviewer {
            if self.matcher.has_unresolved_issues(&latest.text) {
                return CollaborationDecision::proceed("reviewer reported unresolved issues");
            }
            if self.matcher.is_approved(&latest.text) {
                return CollaborationDecision::stop("reviewer approved");
            }
            if self.matcher.is_rejected(&latest.text) {
                return CollaborationDecision::proceed("reviewer requested changes");
            }
        }

        // Q&A exchange: readiness of the latest answer decides
        if latest.is_dialogue {
            return if self.matcher.is_ready(&latest.text) {
                CollaborationDecision::stop(format!("{} is ready to proceed", latest.speaker))
            } else {
                CollaborationDecision::proceed("question still being discussed")
            };
        }

        if from_reviewer {
            return CollaborationDecision::proceed("reviewer has not approved");
        }
        CollaborationDecision::proceed(format!("awaiting review after {}", latest.speaker))
    }

    /// A detected question whose addressee has not spoken since
    pub fn needs_direct_dialogue(&self, entries: &[ConversationEntry]) -> Option<DialogueRequest> {
        let question = self.detect_question_to_agent(entries)?;
        let answered = entries[question.index + 1..]
            .iter()
            .any(|e| e.speaker == question.to);
        if answered {
            debug!("Question from {} to {} already answered", question.from, question.to);
            return None;
        }

        debug!("Dialogue needed: {} asked {}", question.from, question.to);
        Some(DialogueRequest {
            agent_a: question.from,
            agent_b: question.to,
            reason: format!("{} asked {}: {}", question.from, question.to, question.text),
            question_index: question.index,
        })
    }
}
