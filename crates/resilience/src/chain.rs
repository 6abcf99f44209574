//! Resilience chain: retry, circuit breaker and fallback around one handler call

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitStats};
use crate::fallback::{FailureContext, FallbackPath, FallbackReport};
use crate::retry::{RetryConfig, RetryPolicy, TierPolicies};
use chrono::{DateTime, Utc};
use event_model::{CriticalityTier, EventEnvelope, FailureClass, HandlerError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Chain configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub tiers: TierPolicies,
    /// Budget for a single handler attempt
    pub handler_timeout_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            tiers: TierPolicies::default(),
            handler_timeout_ms: 30_000,
        }
    }
}

/// Terminal result of one execution
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Failed(FallbackReport),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// One chain per protected operation class; its circuit state is shared by
/// every envelope routed through it.
pub struct ResilienceChain {
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    tiers: TierPolicies,
    handler_timeout: Duration,
    fallback: Arc<FallbackPath>,
}

impl ResilienceChain {
    pub fn new(
        operation_class: impl Into<String>,
        config: &ResilienceConfig,
        fallback: Arc<FallbackPath>,
    ) -> Self {
        Self {
            breaker: CircuitBreaker::new(operation_class, config.circuit_breaker.clone()),
            retry: RetryPolicy::new(config.retry.clone()),
            tiers: config.tiers.clone(),
            handler_timeout: Duration::from_millis(config.handler_timeout_ms),
            fallback,
        }
    }

    pub fn operation_class(&self) -> &str {
        self.breaker.name()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn stats(&self) -> CircuitStats {
        self.breaker.stats()
    }

    /// Run `operation` until it succeeds, fails permanently, exhausts the
    /// tier's attempt budget or is short-circuited. Every attempt is bounded
    /// by the handler timeout and recorded against the circuit.
    pub async fn execute<T, F, Fut>(
        &self,
        envelope: &EventEnvelope,
        tier: CriticalityTier,
        mut operation: F,
    ) -> Outcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HandlerError>>,
    {
        let policy = self.tiers.for_tier(tier);
        let mut attempts = 0u32;
        let mut first_failed_at: Option<DateTime<Utc>> = None;
        let mut last_error: Option<HandlerError> = None;

        loop {
            if let Err(open) = self.breaker.try_acquire() {
                let reason = match &last_error {
                    Some(e) => format!("{open}; last error: {e}"),
                    None => open.to_string(),
                };
                return self
                    .fail(
                        envelope,
                        FailureClass::CircuitOpen,
                        reason,
                        "CircuitOpen",
                        attempts,
                        first_failed_at,
                        tier,
                        policy.must_notify,
                    )
                    .await;
            }

            attempts += 1;
            let result = match tokio::time::timeout(self.handler_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(HandlerError::Timeout(self.handler_timeout)),
            };

            let err = match result {
                Ok(value) => {
                    self.breaker.record_success();
                    if attempts > 1 {
                        debug!(circuit = %self.breaker.name(), attempts, "Succeeded after retry");
                    }
                    return Outcome::Success(value);
                }
                Err(err) => err,
            };

            first_failed_at.get_or_insert_with(Utc::now);

            if !err.is_retryable() {
                // Bad input says nothing about the dependency's health
                self.breaker.release();
                return self
                    .fail(
                        envelope,
                        err.failure_class(),
                        err.to_string(),
                        error_class(&err),
                        attempts,
                        first_failed_at,
                        tier,
                        policy.must_notify,
                    )
                    .await;
            }

            self.breaker.record_failure(&err.to_string());

            if attempts >= policy.max_attempts {
                return self
                    .fail(
                        envelope,
                        FailureClass::RetriesExhausted,
                        format!("{} attempts failed; last error: {err}", attempts),
                        error_class(&err),
                        attempts,
                        first_failed_at,
                        tier,
                        policy.must_notify,
                    )
                    .await;
            }

            let delay = self.retry.delay_for(attempts);
            warn!(
                circuit = %self.breaker.name(),
                at = %envelope.coordinates(),
                attempt = attempts,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Attempt failed, retrying"
            );
            last_error = Some(err);
            tokio::time::sleep(delay).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn fail<T>(
        &self,
        envelope: &EventEnvelope,
        failure_class: FailureClass,
        reason: String,
        error_class: &str,
        attempts: u32,
        first_failed_at: Option<DateTime<Utc>>,
        tier: CriticalityTier,
        must_notify: bool,
    ) -> Outcome<T> {
        let failure = FailureContext {
            failure_class,
            reason,
            error_class: error_class.to_string(),
            attempts,
            first_failed_at: first_failed_at.unwrap_or_else(Utc::now),
            tier,
            must_notify,
        };
        Outcome::Failed(self.fallback.run(envelope, failure).await)
    }
}

fn error_class(err: &HandlerError) -> &'static str {
    match err {
        HandlerError::Transient(_) => "Transient",
        HandlerError::Permanent(_) => "Permanent",
        HandlerError::Timeout(_) => "Timeout",
    }
}
