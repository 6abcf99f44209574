//! Resilience Chain
//!
//! Wraps a fallible handler call in retry with exponential backoff, a
//! failure-rate circuit breaker and a fallback path that dead-letters,
//! audits and (for must-notify tiers) pages before giving up.

mod breaker;
mod chain;
mod fallback;
mod retry;

pub use breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState, CircuitStats,
    InvalidBreakerConfig,
};
pub use chain::{Outcome, ResilienceChain, ResilienceConfig};
pub use fallback::{FallbackPath, FallbackReport, FailureContext};
pub use retry::{RetryConfig, RetryPolicy, TierPolicies, TierPolicy};

pub use dead_letter::AuditService;
