//! Anthropic Messages API caller
//!
//! Each call is a single stateless request. Retrying is left to
//! [`RetryingCaller`](crate::RetryingCaller); this caller only classifies
//! failures as transient or permanent.

use async_trait::async_trait;
use quorum_core::AgentSettings;
use std::time::Instant;
use tracing::{debug, info, instrument};

use crate::auth;
use crate::caller::AgentCaller;
use crate::error::AgentError;
use crate::types::{AgentRequest, AgentResponse, AnthropicMessage, AnthropicRequest, AnthropicResponse};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicCaller {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_tokens: usize,
    api_key_env: String,
}

impl AnthropicCaller {
    pub fn new(model: impl Into<String>) -> Self {
        let defaults = AgentSettings::default();
        Self {
            client: reqwest::Client::new(),
            endpoint: ANTHROPIC_API_URL.to_string(),
            model: model.into(),
            max_tokens: defaults.max_tokens,
            api_key_env: defaults.api_key_env,
        }
    }

    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self::new(settings.model.clone())
            .with_max_tokens(settings.max_tokens)
            .with_api_key_env(settings.api_key_env.clone())
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_api_key_env(mut self, api_key_env: impl Into<String>) -> Self {
        self.api_key_env = api_key_env.into();
        self
    }

    /// Point at a different Messages endpoint (proxies, gateways)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Map an HTTP status to an error class
fn classify_status(status: reqwest::StatusCode, body: &str) -> AgentError {
    let message = format!("Anthropic API error {}: {}", status, body);
    if status.as_u16() == 429 || status.as_u16() == 529 || status.is_server_error() {
        AgentError::transient(message)
    } else {
        AgentError::permanent(message)
    }
}

#[async_trait]
impl AgentCaller for AnthropicCaller {
    #[instrument(skip(self, request), fields(role = %request.role, model = %self.model))]
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let token = auth::get_auth_token(&self.api_key_env)?;
        let started = Instant::now();

        let body = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: request.prompt,
            }],
        };

        debug!("Sending request to Anthropic API");
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &token)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::timeout(format!("request exceeded {:?}", request.timeout))
                } else {
                    AgentError::transient(format!("Failed to send request: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(classify_status(status, &text));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| AgentError::permanent(format!("Failed to parse response: {}", e)))?;

        let text = parsed.text();
        if text.is_empty() {
            return Err(AgentError::permanent("No text content in response"));
        }

        let usage: quorum_core::Usage = parsed.usage.map(Into::into).unwrap_or_default();
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            chars = text.len(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            duration_ms,
            "Agent call complete"
        );

        Ok(AgentResponse {
            text,
            usage,
            duration_ms,
        })
    }
}
