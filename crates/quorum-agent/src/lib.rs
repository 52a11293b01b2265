//! # quorum-agent
//!
//! Agent callers for Quorum orchestration.
//!
//! Every language-model call goes through the [`AgentCaller`] trait:
//! - [`AnthropicCaller`] talks to the Messages API over HTTP
//! - [`CliAgentCaller`] runs a command-line agent inside the environment
//! - [`RetryingCaller`] wraps either with transient retry and a circuit breaker
//! - [`ScriptedCaller`] replays canned replies for tests
//!
//! Callers are stateless; the conversation that matters lives in the prompt.

mod anthropic;
mod auth;
mod caller;
mod circuit_breaker;
mod cli;
mod error;
mod retry;
mod types;

pub use anthropic::AnthropicCaller;
pub use auth::get_auth_token;
pub use caller::{AgentCaller, ScriptedCaller};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use cli::CliAgentCaller;
pub use error::{AgentError, AgentErrorKind};
pub use retry::RetryingCaller;
pub use types::{AgentRequest, AgentResponse};

use quorum_core::{AgentSettings, CallerKind};
use std::sync::Arc;
use std::time::Duration;

/// Build the configured caller, wrapped in retry and circuit breaking
pub fn build_caller(settings: &AgentSettings, termination_grace: Duration) -> Arc<dyn AgentCaller> {
    match settings.caller {
        CallerKind::Anthropic => Arc::new(RetryingCaller::new(
            AnthropicCaller::from_settings(settings),
            settings.max_attempts,
        )),
        CallerKind::Cli => Arc::new(RetryingCaller::new(
            CliAgentCaller::new(settings.cli_command.clone()).with_grace(termination_grace),
            settings.max_attempts,
        )),
    }
}
