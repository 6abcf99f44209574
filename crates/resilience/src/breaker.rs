//! Failure-rate circuit breaker
//!
//! - **Closed**: calls pass; the last `sliding_window_size` results are kept
//!   and the circuit opens once the failure rate reaches the threshold
//!   (evaluated only after `minimum_calls` results).
//! - **Open**: calls are rejected until `open_cooldown_ms` elapses.
//! - **HalfOpen**: up to `half_open_trials` calls are admitted. All succeed:
//!   Closed with a fresh window. Any failure: Open with a restarted cooldown.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure percentage (0-100) that opens the circuit
    pub failure_rate_threshold: f64,
    /// Number of most recent results considered
    pub sliding_window_size: usize,
    /// Results required before the rate is evaluated
    pub minimum_calls: usize,
    /// Time spent Open before probing
    pub open_cooldown_ms: u64,
    /// Trial calls admitted while HalfOpen
    pub half_open_trials: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            sliding_window_size: 10,
            minimum_calls: 5,
            open_cooldown_ms: 30_000,
            half_open_trials: 3,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn with_failure_rate_threshold(mut self, percent: f64) -> Self {
        self.failure_rate_threshold = percent;
        self
    }

    #[must_use]
    pub fn with_window(mut self, sliding_window_size: usize, minimum_calls: usize) -> Self {
        self.sliding_window_size = sliding_window_size;
        self.minimum_calls = minimum_calls;
        self
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.open_cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_half_open_trials(mut self, trials: u32) -> Self {
        self.half_open_trials = trials;
        self
    }

    /// Reject settings under which the circuit could never open
    pub fn validate(&self) -> Result<(), InvalidBreakerConfig> {
        let threshold = self.failure_rate_threshold;
        if !(threshold > 0.0 && threshold <= 100.0) {
            return Err(InvalidBreakerConfig(format!(
                "failure_rate_threshold must be in (0, 100], got {threshold}"
            )));
        }
        if self.sliding_window_size == 0 {
            return Err(InvalidBreakerConfig("sliding_window_size must be > 0".into()));
        }
        if self.minimum_calls > self.sliding_window_size {
            return Err(InvalidBreakerConfig(format!(
                "minimum_calls ({}) exceeds sliding_window_size ({})",
                self.minimum_calls, self.sliding_window_size
            )));
        }
        Ok(())
    }

    fn cooldown(&self) -> Duration {
        Duration::from_millis(self.open_cooldown_ms)
    }

    /// Results needed before the rate counts; never more than the window holds
    fn effective_minimum_calls(&self) -> usize {
        self.minimum_calls.clamp(1, self.sliding_window_size.max(1))
    }
}

#[derive(Debug, Clone, Error)]
#[error("invalid circuit breaker config: {0}")]
pub struct InvalidBreakerConfig(pub String);

/// Returned when a call is short-circuited
#[derive(Debug, Clone, Error)]
#[error("circuit '{circuit_name}' is open (failure rate {failure_rate:.1}%)")]
pub struct CircuitOpenError {
    pub circuit_name: String,
    pub failure_rate: f64,
    pub last_error: Option<String>,
}

/// Snapshot for health reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_rate: f64,
    pub window_calls: usize,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
    pub times_opened: u64,
    pub last_failure_reason: Option<String>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    /// `true` marks a failure
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_admitted: u32,
    half_open_successes: u32,
    last_failure_reason: Option<String>,
}

impl BreakerState {
    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|failed| **failed).count();
        failures as f64 * 100.0 / self.window.len() as f64
    }
}

/// Circuit breaker shared by every call of one operation class
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    rejected_calls: AtomicU64,
    times_opened: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(config.sliding_window_size.max(1)),
                opened_at: None,
                half_open_admitted: 0,
                half_open_successes: 0,
                last_failure_reason: None,
            }),
            config,
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            times_opened: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock();
        self.maybe_half_open(&mut state);
        state.state
    }

    /// Ask permission for one call. Every admitted call must be followed by
    /// exactly one of `record_success`, `record_failure` or `release`.
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let mut state = self.state.lock();
        self.maybe_half_open(&mut state);

        let admitted = match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if state.half_open_admitted < self.config.half_open_trials.max(1) {
                    state.half_open_admitted += 1;
                    true
                } else {
                    false
                }
            }
        };

        if admitted {
            self.total_calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            debug!(circuit = %self.name, state = %state.state, "Call rejected");
            Err(CircuitOpenError {
                circuit_name: self.name.clone(),
                failure_rate: state.failure_rate(),
                last_error: state.last_failure_reason.clone(),
            })
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => self.push_result(&mut state, false),
            CircuitState::HalfOpen => {
                state.half_open_successes += 1;
                if state.half_open_successes >= self.config.half_open_trials.max(1) {
                    info!(circuit = %self.name, "Circuit closed, dependency recovered");
                    state.state = CircuitState::Closed;
                    state.window.clear();
                    state.opened_at = None;
                    state.half_open_admitted = 0;
                    state.half_open_successes = 0;
                    state.last_failure_reason = None;
                }
            }
            // Late result from a call admitted before the circuit opened
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, reason: &str) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        state.last_failure_reason = Some(reason.to_string());
        match state.state {
            CircuitState::Closed => {
                self.push_result(&mut state, true);
                let rate = state.failure_rate();
                if state.window.len() >= self.config.effective_minimum_calls()
                    && rate >= self.config.failure_rate_threshold
                {
                    warn!(circuit = %self.name, failure_rate = rate, reason, "Circuit opened");
                    self.open(&mut state);
                }
            }
            CircuitState::HalfOpen => {
                warn!(circuit = %self.name, reason, "Trial call failed, circuit re-opened");
                self.open(&mut state);
            }
            CircuitState::Open => {}
        }
    }

    /// Return a permit without recording an outcome
    pub fn release(&self) {
        let mut state = self.state.lock();
        if state.state == CircuitState::HalfOpen {
            state.half_open_admitted = state.half_open_admitted.saturating_sub(1);
        }
    }

    pub fn stats(&self) -> CircuitStats {
        let mut state = self.state.lock();
        self.maybe_half_open(&mut state);
        CircuitStats {
            name: self.name.clone(),
            state: state.state,
            failure_rate: state.failure_rate(),
            window_calls: state.window.len(),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            times_opened: self.times_opened.load(Ordering::Relaxed),
            last_failure_reason: state.last_failure_reason.clone(),
        }
    }

    fn push_result(&self, state: &mut BreakerState, failed: bool) {
        let size = self.config.sliding_window_size.max(1);
        while state.window.len() >= size {
            state.window.pop_front();
        }
        state.window.push_back(failed);
    }

    fn open(&self, state: &mut BreakerState) {
        state.state = CircuitState::Open;
        state.opened_at = Some(Instant::now());
        state.half_open_admitted = 0;
        state.half_open_successes = 0;
        self.times_opened.fetch_add(1, Ordering::Relaxed);
    }

    fn maybe_half_open(&self, state: &mut BreakerState) {
        if state.state != CircuitState::Open {
            return;
        }
        let cooled = state
            .opened_at
            .map(|opened| opened.elapsed() >= self.config.cooldown())
            .unwrap_or(true);
        if cooled {
            info!(circuit = %self.name, "Circuit half-open, probing dependency");
            state.state = CircuitState::HalfOpen;
            state.half_open_admitted = 0;
            state.half_open_successes = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "ledger",
            CircuitBreakerConfig::default()
                .with_window(10, 5)
                .with_cooldown(Duration::from_secs(30))
                .with_half_open_trials(3),
        )
    }

    fn fail(b: &CircuitBreaker) {
        b.try_acquire().unwrap();
        b.record_failure("boom");
    }

    fn succeed(b: &CircuitBreaker) {
        b.try_acquire().unwrap();
        b.record_success();
    }

    #[tokio::test(start_paused = true)]
    async fn test_minimum_calls_before_opening() {
        let b = breaker();
        for _ in 0..4 {
            fail(&b);
        }
        assert_eq!(b.state(), CircuitState::Closed);
        fail(&b);
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.try_acquire().is_err());
        assert_eq!(b.stats().rejected_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_minimum_calls_above_window_still_opens() {
        let config = CircuitBreakerConfig::default().with_window(4, 10);
        assert!(config.validate().is_err());

        let b = CircuitBreaker::new("ledger", config);
        for _ in 0..4 {
            fail(&b);
        }
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn test_validate_rejects_empty_window() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        assert!(CircuitBreakerConfig::default().with_window(0, 0).validate().is_err());
        assert!(CircuitBreakerConfig::default()
            .with_failure_rate_threshold(0.0)
            .validate()
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_below_threshold_stays_closed() {
        let b = breaker();
        for _ in 0..10 {
            succeed(&b);
            succeed(&b);
            fail(&b);
        }
        let stats = b.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert!(stats.failure_rate < 50.0);
        assert_eq!(stats.window_calls, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_open_then_closed() {
        let b = breaker();
        for _ in 0..5 {
            fail(&b);
        }
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(b.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        for _ in 0..3 {
            succeed(&b);
        }
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.stats().window_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_restarts_cooldown() {
        let b = breaker();
        for _ in 0..5 {
            fail(&b);
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        succeed(&b);
        fail(&b);
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.stats().times_opened, 2);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_trials() {
        let b = breaker();
        for _ in 0..5 {
            fail(&b);
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        for _ in 0..3 {
            b.try_acquire().unwrap();
        }
        assert!(b.try_acquire().is_err());

        // A released permit frees a trial slot
        b.release();
        assert!(b.try_acquire().is_ok());
    }
}
