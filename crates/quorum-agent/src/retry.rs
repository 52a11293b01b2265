//! Transient retry around any caller

use async_trait::async_trait;
use quorum_core::{bounded_iterate, Backoff};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use crate::caller::AgentCaller;
use crate::circuit_breaker::CircuitBreaker;
use crate::error::AgentError;
use crate::types::{AgentRequest, AgentResponse};

/// Retries transient failures with exponential backoff
///
/// Permanent errors and timeouts are returned immediately. Every failure
/// counts against a shared circuit breaker; while it is open no call
/// reaches the inner caller.
pub struct RetryingCaller<C: AgentCaller> {
    inner: C,
    max_attempts: usize,
    backoff: Backoff,
    breaker: Arc<CircuitBreaker>,
}

impl<C: AgentCaller> RetryingCaller<C> {
    pub fn new(inner: C, max_attempts: usize) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential {
                initial: Duration::from_secs(2),
                max: Duration::from_secs(60),
            },
            breaker: Arc::new(CircuitBreaker::default()),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Share a breaker between several callers
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn attempt(&self, request: AgentRequest, round: usize) -> Result<AgentResponse, AgentError> {
        if !self.breaker.can_execute() {
            return Err(AgentError::transient(format!(
                "circuit breaker open, retry in {:?}",
                self.breaker.time_until_retry()
            )));
        }

        match self.inner.invoke(request).await {
            Ok(response) => {
                self.breaker.record_success();
                Ok(response)
            }
            Err(e) => {
                self.breaker.record_failure();
                if e.is_transient() && round < self.max_attempts {
                    warn!(attempt = round, max = self.max_attempts, "Transient agent error: {}", e);
                } else {
                    error!(
                        failures = self.breaker.failure_count(),
                        "Agent call failed: {}", e
                    );
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<C: AgentCaller> AgentCaller for RetryingCaller<C> {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let outcome = bounded_iterate(
            self.max_attempts,
            &self.backoff,
            |round| self.attempt(request.clone(), round),
            |result: &Result<AgentResponse, AgentError>| match result {
                Ok(_) => true,
                Err(e) => !e.is_transient(),
            },
        )
        .await;

        outcome
            .last
            .unwrap_or_else(|| Err(AgentError::permanent("no attempt was made")))
    }
}
