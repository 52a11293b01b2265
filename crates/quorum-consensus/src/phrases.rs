//! Compiled phrase sets
//!
//! Phrases match case-insensitively. A phrase that starts with a word
//! character must also start on a word boundary, so "bug" does not fire on
//! "debug" while "issue" still fires on "issues".

use quorum_core::{PhraseSets, QuorumError, Result};
use regex::Regex;

/// One compiled phrase list
#[derive(Debug, Clone)]
struct PhraseSet {
    regex: Option<Regex>,
}

impl PhraseSet {
    fn compile(name: &str, phrases: &[String]) -> Result<Self> {
        let alternatives: Vec<String> = phrases
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| {
                let escaped = regex::escape(p);
                if p.starts_with(|c: char| c.is_alphanumeric()) {
                    format!(r"\b{}", escaped)
                } else {
                    escaped
                }
            })
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { regex: None });
        }

        let pattern = format!("(?i)(?:{})", alternatives.join("|"));
        let regex = Regex::new(&pattern)
            .map_err(|e| QuorumError::Config(format!("invalid {} phrases: {}", name, e)))?;
        Ok(Self { regex: Some(regex) })
    }

    fn is_match(&self, text: &str) -> bool {
        self.regex.as_ref().is_some_and(|r| r.is_match(text))
    }

    /// `text` with every match blanked out
    fn strip(&self, text: &str) -> String {
        match &self.regex {
            Some(r) => r.replace_all(text, " ").into_owned(),
            None => text.to_string(),
        }
    }
}

/// Classifiers built from a [`PhraseSets`]
///
/// Each classifier strips the negated phrases before looking for the
/// positive ones, and a negative signal always wins over a positive one.
#[derive(Debug, Clone)]
pub struct PhraseMatcher {
    approval: PhraseSet,
    rejection: PhraseSet,
    issue: PhraseSet,
    resolved: PhraseSet,
    ready: PhraseSet,
    not_ready: PhraseSet,
    direct_address: PhraseSet,
}

impl PhraseMatcher {
    pub fn new(phrases: &PhraseSets) -> Result<Self> {
        Ok(Self {
            approval: PhraseSet::compile("approval", &phrases.approval)?,
            rejection: PhraseSet::compile("rejection", &phrases.rejection)?,
            issue: PhraseSet::compile("issue", &phrases.issue)?,
            resolved: PhraseSet::compile("resolved", &phrases.resolved)?,
            ready: PhraseSet::compile("ready", &phrases.ready)?,
            not_ready: PhraseSet::compile("not_ready", &phrases.not_ready)?,
            direct_address: PhraseSet::compile("direct_address", &phrases.direct_address)?,
        })
    }

    pub fn is_approved(&self, text: &str) -> bool {
        if self.rejection.is_match(text) {
            return false;
        }
        self.approval.is_match(&self.rejection.strip(text))
    }

    pub fn is_rejected(&self, text: &str) -> bool {
        self.rejection.is_match(text)
    }

    pub fn has_unresolved_issues(&self, text: &str) -> bool {
        self.issue.is_match(&self.resolved.strip(text))
    }

    pub fn is_ready(&self, text: &str) -> bool {
        if self.not_ready.is_match(text) {
            return false;
        }
        self.ready.is_match(&self.not_ready.strip(text))
    }

    pub fn addresses_directly(&self, text: &str) -> bool {
        self.direct_address.is_match(text)
    }
}
