//! Alert State Tracker Implementation

use crate::config::AlertConfig;
use crate::state::{AlertState, Severity, Transition, TransitionKind};
use crate::AlertError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

type StateKey = (String, String);

/// Per (subject, metric) hysteresis state machine.
///
/// Each key's state lives in its own map entry, so observations for
/// different subjects never serialize on a shared lock.
pub struct AlertStateTracker {
    config: AlertConfig,
    states: DashMap<StateKey, AlertState>,
}

impl AlertStateTracker {
    /// Create a new tracker, rejecting invalid policies up front
    pub fn new(config: AlertConfig) -> Result<Self, AlertError> {
        config.validate()?;
        info!(
            rules = config.metrics.len(),
            alpha = config.ewma_alpha,
            "Creating alert state tracker"
        );
        Ok(Self {
            config,
            states: DashMap::new(),
        })
    }

    /// Fold one sample into the state for `(subject_id, metric_kind)`.
    ///
    /// Returns a transition only when severity changes.
    pub fn observe(
        &self,
        subject_id: &str,
        metric_kind: &str,
        value: f64,
        threshold: f64,
        at: DateTime<Utc>,
    ) -> Option<Transition> {
        let comparator = self.config.comparator_for(metric_kind);
        let policy = self.config.policy_for(metric_kind);
        let breached = comparator.breaches(value, threshold);

        let mut state = self
            .states
            .entry((subject_id.to_string(), metric_kind.to_string()))
            .or_insert_with(|| AlertState::new(subject_id, metric_kind, at));

        let anomaly_score = state.anomaly_score(value);
        state.update_baseline(value, self.config.ewma_alpha);
        state.last_value = value;
        state.last_threshold = threshold;
        state.last_observed_at = at;

        if breached {
            state.consecutive_breaches = state.consecutive_breaches.saturating_add(1);
            state.consecutive_clears = 0;

            let target = policy.severity_for(state.consecutive_breaches);
            if target <= state.severity {
                debug!(
                    subject = subject_id,
                    metric = metric_kind,
                    breaches = state.consecutive_breaches,
                    "Breach below next tier"
                );
                return None;
            }

            let from = state.severity;
            state.severity = target;
            state.acknowledged = false;
            state.last_transition_at = Some(at);
            let incident_id = state
                .open_incident
                .get_or_insert_with(|| Uuid::new_v4().to_string())
                .clone();

            info!(
                subject = subject_id,
                metric = metric_kind,
                from = %from,
                to = %target,
                breaches = state.consecutive_breaches,
                "Alert escalated"
            );
            Some(Transition {
                subject_id: subject_id.to_string(),
                metric_kind: metric_kind.to_string(),
                kind: TransitionKind::Escalate,
                from,
                to: target,
                value,
                threshold,
                run_length: state.consecutive_breaches,
                anomaly_score,
                incident_id: Some(incident_id),
                at,
            })
        } else {
            state.consecutive_clears = state.consecutive_clears.saturating_add(1);
            state.consecutive_breaches = 0;

            if state.severity == Severity::None
                || state.consecutive_clears < policy.clear_run_length
            {
                return None;
            }

            let from = state.severity;
            state.severity = Severity::None;
            state.acknowledged = false;
            state.last_transition_at = Some(at);
            let incident_id = state.open_incident.take();

            info!(
                subject = subject_id,
                metric = metric_kind,
                from = %from,
                clears = state.consecutive_clears,
                "Alert recovered"
            );
            Some(Transition {
                subject_id: subject_id.to_string(),
                metric_kind: metric_kind.to_string(),
                kind: TransitionKind::DeEscalate,
                from,
                to: Severity::None,
                value,
                threshold,
                run_length: state.consecutive_clears,
                anomaly_score,
                incident_id,
                at,
            })
        }
    }

    /// Acknowledge an active alert. Severity and counters are unchanged.
    pub fn acknowledge(
        &self,
        subject_id: &str,
        metric_kind: &str,
        at: DateTime<Utc>,
    ) -> Option<Transition> {
        let mut state = self
            .states
            .get_mut(&(subject_id.to_string(), metric_kind.to_string()))?;
        if !state.is_active() || state.acknowledged {
            return None;
        }
        state.acknowledged = true;
        info!(subject = subject_id, metric = metric_kind, "Alert acknowledged");
        Some(Self::manual_transition(&state, TransitionKind::Acknowledge, state.severity, at))
    }

    /// Operator resolution: force the state back to `None` and close the incident
    pub fn resolve(
        &self,
        subject_id: &str,
        metric_kind: &str,
        at: DateTime<Utc>,
    ) -> Option<Transition> {
        let mut state = self
            .states
            .get_mut(&(subject_id.to_string(), metric_kind.to_string()))?;
        if !state.is_active() {
            return None;
        }
        let mut transition =
            Self::manual_transition(&state, TransitionKind::Resolve, Severity::None, at);
        transition.incident_id = state.open_incident.take();
        state.severity = Severity::None;
        state.consecutive_breaches = 0;
        state.consecutive_clears = 0;
        state.acknowledged = false;
        state.last_transition_at = Some(at);
        info!(subject = subject_id, metric = metric_kind, "Alert resolved");
        Some(transition)
    }

    fn manual_transition(
        state: &AlertState,
        kind: TransitionKind,
        to: Severity,
        at: DateTime<Utc>,
    ) -> Transition {
        Transition {
            subject_id: state.subject_id.clone(),
            metric_kind: state.metric_kind.clone(),
            kind,
            from: state.severity,
            to,
            value: state.last_value,
            threshold: state.last_threshold,
            run_length: state.consecutive_breaches,
            anomaly_score: 0.0,
            incident_id: state.open_incident.clone(),
            at,
        }
    }

    /// Drop quiet states not observed within `max_idle`. Active alerts are kept.
    pub fn decay_idle(&self, max_idle: Duration, now: DateTime<Utc>) -> usize {
        let before = self.states.len();
        self.states.retain(|_, state| {
            if state.is_active() {
                return true;
            }
            match now.signed_duration_since(state.last_observed_at).to_std() {
                Ok(idle) => idle < max_idle,
                // Observed "in the future" relative to `now`
                Err(_) => true,
            }
        });
        let removed = before.saturating_sub(self.states.len());
        if removed > 0 {
            debug!(removed, "Decayed idle alert states");
        }
        removed
    }

    pub fn state(&self, subject_id: &str, metric_kind: &str) -> Option<AlertState> {
        self.states
            .get(&(subject_id.to_string(), metric_kind.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Copy of every tracked state
    pub fn snapshot(&self) -> Vec<AlertState> {
        self.states.iter().map(|entry| entry.value().clone()).collect()
    }

    /// States currently above `None`, most severe first
    pub fn active(&self) -> Vec<AlertState> {
        let mut active: Vec<AlertState> = self
            .states
            .iter()
            .filter(|entry| entry.is_active())
            .map(|entry| entry.value().clone())
            .collect();
        active.sort_by(|a, b| b.severity.cmp(&a.severity));
        active
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HysteresisPolicy;
    use chrono::Duration as ChronoDuration;
    use proptest::prelude::*;

    fn tracker_with(policy: HysteresisPolicy) -> AlertStateTracker {
        AlertStateTracker::new(AlertConfig {
            default_policy: policy,
            ..Default::default()
        })
        .unwrap()
    }

    fn feed(tracker: &AlertStateTracker, values: &[f64]) -> Vec<(usize, Transition)> {
        let start = Utc::now();
        values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| {
                tracker
                    .observe("db-1", "cpu_utilization", *v, 80.0, start + ChronoDuration::seconds(i as i64))
                    .map(|t| (i, t))
            })
            .collect()
    }

    #[test]
    fn test_escalates_once_after_run_length() {
        let tracker = tracker_with(HysteresisPolicy::single(Severity::Warning, 3, 3));
        let transitions = feed(&tracker, &[85.0, 90.0, 70.0, 88.0, 92.0, 95.0]);

        assert_eq!(transitions.len(), 1);
        let (index, transition) = &transitions[0];
        assert_eq!(*index, 5);
        assert_eq!(transition.kind, TransitionKind::Escalate);
        assert_eq!(transition.to, Severity::Warning);
        assert_eq!(transition.run_length, 3);
        assert!(transition.incident_id.is_some());
    }

    #[test]
    fn test_tiers_escalate_progressively() {
        let tracker = tracker_with(HysteresisPolicy::default());
        let transitions = feed(&tracker, &[90.0; 8]);
        let path: Vec<_> = transitions.iter().map(|(i, t)| (*i, t.to)).collect();
        assert_eq!(
            path,
            vec![(2, Severity::Warning), (3, Severity::High), (4, Severity::Critical)]
        );
        // One incident across the whole streak
        assert_eq!(transitions[0].1.incident_id, transitions[2].1.incident_id);
    }

    #[test]
    fn test_recovery_requires_clear_run() {
        let tracker = tracker_with(HysteresisPolicy::single(Severity::Warning, 2, 3));
        let transitions = feed(&tracker, &[90.0, 90.0, 50.0, 50.0, 90.0, 50.0, 50.0, 50.0]);

        let kinds: Vec<_> = transitions.iter().map(|(i, t)| (*i, t.kind)).collect();
        assert_eq!(
            kinds,
            vec![(1, TransitionKind::Escalate), (7, TransitionKind::DeEscalate)]
        );
        let recovery = &transitions[1].1;
        assert_eq!(recovery.from, Severity::Warning);
        assert_eq!(recovery.incident_id, transitions[0].1.incident_id);

        let state = tracker.state("db-1", "cpu_utilization").unwrap();
        assert_eq!(state.severity, Severity::None);
        assert!(state.open_incident.is_none());
    }

    #[test]
    fn test_below_comparator_for_availability() {
        let tracker = AlertStateTracker::new(AlertConfig::default()).unwrap();
        let t = tracker
            .observe("checkout", "availability", 97.5, 99.9, Utc::now())
            .unwrap();
        assert_eq!(t.to, Severity::Critical);
        assert!(tracker.observe("checkout", "availability", 99.95, 99.9, Utc::now()).is_some());
    }

    #[test]
    fn test_acknowledge_and_resolve() {
        let tracker = tracker_with(HysteresisPolicy::single(Severity::High, 1, 3));
        let now = Utc::now();
        assert!(tracker.acknowledge("db-1", "cpu_utilization", now).is_none());

        tracker.observe("db-1", "cpu_utilization", 95.0, 80.0, now);
        let ack = tracker.acknowledge("db-1", "cpu_utilization", now).unwrap();
        assert_eq!(ack.kind, TransitionKind::Acknowledge);
        assert_eq!(ack.to, Severity::High);
        assert!(tracker.acknowledge("db-1", "cpu_utilization", now).is_none());

        let resolved = tracker.resolve("db-1", "cpu_utilization", now).unwrap();
        assert_eq!(resolved.kind, TransitionKind::Resolve);
        assert_eq!(resolved.to, Severity::None);
        assert!(resolved.incident_id.is_some());
        assert!(tracker.active().is_empty());
        assert!(tracker.resolve("db-1", "cpu_utilization", now).is_none());
    }

    #[test]
    fn test_decay_idle_keeps_active_states() {
        let tracker = tracker_with(HysteresisPolicy::single(Severity::Warning, 1, 1));
        let start = Utc::now();
        tracker.observe("quiet", "cpu", 10.0, 80.0, start);
        tracker.observe("loud", "cpu", 99.0, 80.0, start);

        let later = start + ChronoDuration::hours(2);
        assert_eq!(tracker.decay_idle(Duration::from_secs(3600), later), 1);
        assert!(tracker.state("quiet", "cpu").is_none());
        assert!(tracker.state("loud", "cpu").is_some());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AlertConfig {
            ewma_alpha: 0.0,
            ..Default::default()
        };
        assert!(AlertStateTracker::new(config).is_err());
    }

    proptest! {
        #[test]
        fn prop_short_breach_runs_never_escalate(runs in proptest::collection::vec(0usize..3, 1..40)) {
            let tracker = tracker_with(HysteresisPolicy::single(Severity::Warning, 3, 3));
            let mut samples = Vec::new();
            for run in runs {
                samples.extend(std::iter::repeat(95.0).take(run));
                samples.push(40.0);
            }
            prop_assert!(feed(&tracker, &samples).is_empty());
        }

        #[test]
        fn prop_exact_run_length_fires_once(run_length in 1u32..6, extra in 0usize..10) {
            let tracker = tracker_with(HysteresisPolicy::single(Severity::Warning, run_length, 3));
            let samples = vec![95.0; run_length as usize + extra];
            let transitions = feed(&tracker, &samples);
            prop_assert_eq!(transitions.len(), 1);
            prop_assert_eq!(transitions[0].0, run_length as usize - 1);
        }
    }
}
