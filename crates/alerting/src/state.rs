//! Alert State Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Alert severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    #[default]
    None,
    Warning,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Warning => "WARNING",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one (subject, metric) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertState {
    pub subject_id: String,
    pub metric_kind: String,
    pub severity: Severity,
    pub consecutive_breaches: u32,
    pub consecutive_clears: u32,
    pub last_transition_at: Option<DateTime<Utc>>,
    pub last_value: f64,
    pub last_threshold: f64,
    pub last_observed_at: DateTime<Utc>,
    /// Whether an operator acknowledged the current alert
    pub acknowledged: bool,
    /// Incident opened by the last escalation, cleared on recovery
    pub open_incident: Option<String>,
    /// EWMA of observed values
    pub baseline: f64,
    /// EWMA variance of observed values
    pub variance: f64,
    pub samples_seen: u64,
}

impl AlertState {
    pub(crate) fn new(subject_id: &str, metric_kind: &str, at: DateTime<Utc>) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            metric_kind: metric_kind.to_string(),
            severity: Severity::None,
            consecutive_breaches: 0,
            consecutive_clears: 0,
            last_transition_at: None,
            last_value: 0.0,
            last_threshold: 0.0,
            last_observed_at: at,
            acknowledged: false,
            open_incident: None,
            baseline: 0.0,
            variance: 0.0,
            samples_seen: 0,
        }
    }

    /// Deviation of `value` from the baseline in standard deviations
    pub fn anomaly_score(&self, value: f64) -> f64 {
        let std_dev = self.variance.sqrt();
        if self.samples_seen == 0 || std_dev <= f64::EPSILON {
            0.0
        } else {
            (value - self.baseline) / std_dev
        }
    }

    /// Fold a sample into the EWMA baseline and variance
    pub(crate) fn update_baseline(&mut self, value: f64, alpha: f64) {
        if self.samples_seen == 0 {
            self.baseline = value;
            self.variance = 0.0;
        } else {
            let delta = value - self.baseline;
            self.baseline += alpha * delta;
            self.variance = (1.0 - alpha) * (self.variance + alpha * delta * delta);
        }
        self.samples_seen += 1;
    }

    pub fn is_active(&self) -> bool {
        self.severity != Severity::None
    }
}

/// Kind of state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionKind {
    Escalate,
    DeEscalate,
    Acknowledge,
    Resolve,
}

/// Emitted whenever an alert state changes severity or is acted upon
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub subject_id: String,
    pub metric_kind: String,
    pub kind: TransitionKind,
    pub from: Severity,
    pub to: Severity,
    pub value: f64,
    pub threshold: f64,
    /// Length of the run that caused the transition
    pub run_length: u32,
    pub anomaly_score: f64,
    pub incident_id: Option<String>,
    pub at: DateTime<Utc>,
}

impl Transition {
    pub fn message(&self) -> String {
        match self.kind {
            TransitionKind::Escalate => format!(
                "{} {} escalated {} -> {}: value {:.2} vs threshold {:.2} for {} consecutive samples",
                self.subject_id, self.metric_kind, self.from, self.to, self.value, self.threshold, self.run_length
            ),
            TransitionKind::DeEscalate => format!(
                "{} {} recovered from {} after {} consecutive clear samples",
                self.subject_id, self.metric_kind, self.from, self.run_length
            ),
            TransitionKind::Acknowledge => format!(
                "{} {} {} alert acknowledged",
                self.subject_id, self.metric_kind, self.from
            ),
            TransitionKind::Resolve => format!(
                "{} {} {} alert resolved",
                self.subject_id, self.metric_kind, self.from
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Warning);
        assert!(Severity::Warning > Severity::None);
    }

    #[test]
    fn test_baseline_is_single_step_smoothing_at_half() {
        let mut state = AlertState::new("db-1", "cpu", Utc::now());
        state.update_baseline(10.0, 0.5);
        state.update_baseline(20.0, 0.5);
        assert!((state.baseline - 15.0).abs() < 1e-9);
        state.update_baseline(40.0, 0.5);
        assert!((state.baseline - 27.5).abs() < 1e-9);
    }

    #[test]
    fn test_anomaly_score_tracks_recent_regime() {
        let mut state = AlertState::new("db-1", "cpu", Utc::now());
        assert_eq!(state.anomaly_score(99.0), 0.0);
        for v in [50.0, 52.0, 48.0, 51.0, 49.0, 50.0] {
            state.update_baseline(v, 0.3);
        }
        assert!(state.anomaly_score(90.0) > 3.0);
    }
}
