//! Retry policy with exponential backoff and per-tier attempt budgets

use event_model::CriticalityTier;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    /// Upper bound on any single delay
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }
}

/// Computes the delay between attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay after the `attempt`-th failed attempt (1-based):
    /// `initial * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let multiplier = self.config.multiplier.max(1.0);
        let raw = self.config.initial_delay_ms as f64 * multiplier.powi(exponent);
        let capped = raw.min(self.config.max_delay_ms as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

/// Retry and notification intensity for one criticality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,
    /// Page out-of-band when the event ends in the fallback path
    pub must_notify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierPolicies {
    pub standard: TierPolicy,
    pub elevated: TierPolicy,
    pub critical: TierPolicy,
}

impl Default for TierPolicies {
    fn default() -> Self {
        Self {
            standard: TierPolicy { max_attempts: 3, must_notify: false },
            elevated: TierPolicy { max_attempts: 4, must_notify: false },
            critical: TierPolicy { max_attempts: 5, must_notify: true },
        }
    }
}

impl TierPolicies {
    pub fn for_tier(&self, tier: CriticalityTier) -> TierPolicy {
        let policy = match tier {
            CriticalityTier::Standard => self.standard,
            CriticalityTier::Elevated => self.elevated,
            CriticalityTier::Critical => self.critical,
        };
        TierPolicy {
            max_attempts: policy.max_attempts.max(1),
            ..policy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_backoff_sequence() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=6).map(|a| policy.delay_for(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000, 10_000]);
    }

    #[test]
    fn test_tier_budgets() {
        let tiers = TierPolicies::default();
        assert_eq!(tiers.for_tier(CriticalityTier::Standard).max_attempts, 3);
        assert_eq!(tiers.for_tier(CriticalityTier::Elevated).max_attempts, 4);
        assert_eq!(tiers.for_tier(CriticalityTier::Critical).max_attempts, 5);
        assert!(tiers.for_tier(CriticalityTier::Critical).must_notify);
        assert!(!tiers.for_tier(CriticalityTier::Standard).must_notify);
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let tiers = TierPolicies {
            standard: TierPolicy { max_attempts: 0, must_notify: false },
            ..Default::default()
        };
        assert_eq!(tiers.for_tier(CriticalityTier::Standard).max_attempts, 1);
    }

    proptest! {
        #[test]
        fn prop_delays_monotonic_and_capped(attempt in 1u32..200) {
            let policy = RetryPolicy::default();
            let current = policy.delay_for(attempt);
            let next = policy.delay_for(attempt + 1);
            prop_assert!(next >= current);
            prop_assert!(next <= Duration::from_secs(10));
        }
    }
}
