//! # quorum-consensus
//!
//! Conversation log and consensus engine for Quorum.
//!
//! Agents never vote. Agreement is read from what they say:
//! - [`ConversationLog`] is the append-only record of a task's messages
//! - [`PhraseMatcher`] compiles the configured phrase sets
//! - [`ConsensusEngine`] classifies the latest entries and decides whether
//!   collaboration continues or two roles need a direct exchange

mod engine;
mod log;
mod phrases;

pub use engine::{
    CollaborationDecision, ConsensusEngine, DetectedQuestion, DialogueRequest, DEFAULT_LOOKBACK,
};
pub use log::{ConversationLog, ConversationSink};
pub use phrases::PhraseMatcher;
