//! Alert Configuration

use crate::state::Severity;
use crate::AlertError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Direction in which a metric breaches its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    /// Utilization, latency, error rate: breach when value > threshold
    Above,
    /// Availability, compliance score: breach when value < threshold
    Below,
}

impl Comparator {
    pub fn breaches(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Above => value > threshold,
            Self::Below => value < threshold,
        }
    }

    /// Comparator for metric kinds with no explicit rule
    pub fn infer(metric_kind: &str) -> Self {
        let kind = metric_kind.to_ascii_lowercase();
        let lower_is_worse = ["availability", "compliance", "uptime", "success_rate", "health_score"];
        if lower_is_worse.iter().any(|marker| kind.contains(marker)) {
            Self::Below
        } else {
            Self::Above
        }
    }
}

/// Consecutive breaches required to reach one severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierRule {
    pub severity: Severity,
    pub breach_run_length: u32,
}

/// Severity tiers and the run lengths that move between them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HysteresisPolicy {
    /// Ordered from least to most severe
    pub tiers: Vec<TierRule>,
    /// Consecutive clears required to recover to `None`
    pub clear_run_length: u32,
}

impl Default for HysteresisPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                TierRule { severity: Severity::Warning, breach_run_length: 3 },
                TierRule { severity: Severity::High, breach_run_length: 4 },
                TierRule { severity: Severity::Critical, breach_run_length: 5 },
            ],
            clear_run_length: 3,
        }
    }
}

impl HysteresisPolicy {
    /// Single-tier policy
    pub fn single(severity: Severity, breach_run_length: u32, clear_run_length: u32) -> Self {
        Self {
            tiers: vec![TierRule { severity, breach_run_length }],
            clear_run_length,
        }
    }

    /// Binary availability-style events: first breach is critical
    pub fn immediate() -> Self {
        Self::single(Severity::Critical, 1, 1)
    }

    /// Highest severity reached by a breach streak of `breaches`
    pub fn severity_for(&self, breaches: u32) -> Severity {
        self.tiers
            .iter()
            .filter(|tier| breaches >= tier.breach_run_length)
            .map(|tier| tier.severity)
            .max()
            .unwrap_or(Severity::None)
    }

    pub fn validate(&self) -> Result<(), AlertError> {
        if self.tiers.is_empty() {
            return Err(AlertError::InvalidPolicy("at least one tier is required".into()));
        }
        if self.clear_run_length == 0 {
            return Err(AlertError::InvalidPolicy("clear_run_length must be >= 1".into()));
        }
        for tier in &self.tiers {
            if tier.severity == Severity::None {
                return Err(AlertError::InvalidPolicy("NONE cannot be an escalation tier".into()));
            }
            if tier.breach_run_length == 0 {
                return Err(AlertError::InvalidPolicy(format!(
                    "{} breach_run_length must be >= 1",
                    tier.severity
                )));
            }
        }
        for pair in self.tiers.windows(2) {
            if pair[1].severity <= pair[0].severity
                || pair[1].breach_run_length < pair[0].breach_run_length
            {
                return Err(AlertError::InvalidPolicy(format!(
                    "tiers must ascend: {} after {}",
                    pair[1].severity, pair[0].severity
                )));
            }
        }
        Ok(())
    }
}

/// Per-metric override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRule {
    pub comparator: Comparator,
    #[serde(default)]
    pub policy: Option<HysteresisPolicy>,
}

/// Alert configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Policy for metric kinds without their own
    pub default_policy: HysteresisPolicy,
    /// Overrides keyed by metric kind
    pub metrics: HashMap<String, MetricRule>,
    /// Minimum gap between notifications per subject and severity (seconds)
    pub cooldown_seconds: u64,
    /// Maximum non-critical notifications per hour before throttling
    pub max_alerts_per_hour: usize,
    /// EWMA smoothing factor for the anomaly baseline (0.5 = `(old + new) / 2`)
    pub ewma_alpha: f64,
    /// Quiet states idle this long are garbage-collected (seconds)
    pub idle_ttl_seconds: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        let mut metrics = HashMap::new();
        metrics.insert(
            "availability".to_string(),
            MetricRule {
                comparator: Comparator::Below,
                policy: Some(HysteresisPolicy::immediate()),
            },
        );
        metrics.insert(
            "compliance_score".to_string(),
            MetricRule {
                comparator: Comparator::Below,
                policy: Some(HysteresisPolicy::single(Severity::High, 2, 2)),
            },
        );
        Self {
            default_policy: HysteresisPolicy::default(),
            metrics,
            cooldown_seconds: 1800, // 30 minutes
            max_alerts_per_hour: 50,
            ewma_alpha: 0.5,
            idle_ttl_seconds: 6 * 3600,
        }
    }
}

impl AlertConfig {
    pub fn comparator_for(&self, metric_kind: &str) -> Comparator {
        self.metrics
            .get(metric_kind)
            .map(|rule| rule.comparator)
            .unwrap_or_else(|| Comparator::infer(metric_kind))
    }

    pub fn policy_for(&self, metric_kind: &str) -> &HysteresisPolicy {
        self.metrics
            .get(metric_kind)
            .and_then(|rule| rule.policy.as_ref())
            .unwrap_or(&self.default_policy)
    }

    pub fn validate(&self) -> Result<(), AlertError> {
        self.default_policy.validate()?;
        for (kind, rule) in &self.metrics {
            if let Some(policy) = &rule.policy {
                policy
                    .validate()
                    .map_err(|e| AlertError::InvalidPolicy(format!("{kind}: {e}")))?;
            }
        }
        if !(self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0) {
            return Err(AlertError::InvalidPolicy(format!(
                "ewma_alpha must be in (0, 1], got {}",
                self.ewma_alpha
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparators() {
        assert!(Comparator::Above.breaches(85.0, 80.0));
        assert!(!Comparator::Above.breaches(80.0, 80.0));
        assert!(Comparator::Below.breaches(98.0, 99.9));
        assert_eq!(Comparator::infer("api_availability"), Comparator::Below);
        assert_eq!(Comparator::infer("p99_latency_ms"), Comparator::Above);
    }

    #[test]
    fn test_severity_for_run_length() {
        let policy = HysteresisPolicy::default();
        assert_eq!(policy.severity_for(2), Severity::None);
        assert_eq!(policy.severity_for(3), Severity::Warning);
        assert_eq!(policy.severity_for(4), Severity::High);
        assert_eq!(policy.severity_for(50), Severity::Critical);
    }

    #[test]
    fn test_policy_validation() {
        assert!(HysteresisPolicy::default().validate().is_ok());
        assert!(HysteresisPolicy::single(Severity::Warning, 0, 1).validate().is_err());
        assert!(HysteresisPolicy::single(Severity::None, 1, 1).validate().is_err());

        let descending = HysteresisPolicy {
            tiers: vec![
                TierRule { severity: Severity::High, breach_run_length: 2 },
                TierRule { severity: Severity::Warning, breach_run_length: 3 },
            ],
            clear_run_length: 1,
        };
        assert!(descending.validate().is_err());
    }

    #[test]
    fn test_metric_overrides() {
        let config = AlertConfig::default();
        assert_eq!(config.comparator_for("availability"), Comparator::Below);
        assert_eq!(config.policy_for("availability"), &HysteresisPolicy::immediate());
        assert_eq!(config.policy_for("cpu_utilization"), &HysteresisPolicy::default());
        assert!(config.validate().is_ok());
    }
}
