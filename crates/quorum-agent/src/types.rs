//! Type definitions for agent calls

use quorum_core::{Role, Usage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// One agent invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
    pub role: Role,
    pub prompt: String,
    /// Environment working directory the agent operates in
    pub working_dir: PathBuf,
    /// Hard wall-clock limit for this call
    pub timeout: Duration,
}

/// Reply from one agent invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentResponse {
    pub text: String,
    pub usage: Usage,
    pub duration_ms: u64,
}

/// Anthropic API message format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AnthropicMessage {
    pub role: String,
    pub content: String,
}

/// Anthropic API request format
#[derive(Debug, Clone, Serialize)]
pub(crate) struct AnthropicRequest {
    pub model: String,
    pub max_tokens: usize,
    pub messages: Vec<AnthropicMessage>,
}

/// Anthropic API response format
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicResponse {
    pub content: Vec<AnthropicContent>,
    pub usage: Option<AnthropicUsage>,
}

/// Content block in Anthropic response
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct AnthropicUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl From<AnthropicUsage> for Usage {
    fn from(usage: AnthropicUsage) -> Self {
        Usage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        }
    }
}

impl AnthropicResponse {
    /// Concatenated text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|block| block.content_type == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
