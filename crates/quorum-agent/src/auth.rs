//! Authentication for the Anthropic API
//!
//! Two sources, checked in order:
//! 1. `CLAUDE_CODE_OAUTH_TOKEN` (subscription access)
//! 2. the configured API key variable (`ANTHROPIC_API_KEY` by default)

use std::env;

use crate::error::AgentError;

const OAUTH_TOKEN_ENV: &str = "CLAUDE_CODE_OAUTH_TOKEN";

/// Get an authentication token, looking up `api_key_env` as the fallback
pub fn get_auth_token(api_key_env: &str) -> Result<String, AgentError> {
    if let Ok(oauth_token) = env::var(OAUTH_TOKEN_ENV) {
        tracing::debug!("Using {} for authentication", OAUTH_TOKEN_ENV);
        return Ok(oauth_token);
    }

    if let Ok(api_key) = env::var(api_key_env) {
        tracing::debug!("Using {} for authentication", api_key_env);
        return Ok(api_key);
    }

    Err(AgentError::permanent(format!(
        "No authentication found. Set {} or {}",
        OAUTH_TOKEN_ENV, api_key_env
    )))
}
