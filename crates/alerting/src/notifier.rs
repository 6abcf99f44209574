//! Notification dispatch
//!
//! Escalations pass through a [`NotificationGate`] (per subject/severity
//! cooldown plus an hourly cap) before reaching the [`AlertingService`].

use crate::config::AlertConfig;
use crate::state::{Severity, Transition, TransitionKind};
use crate::AlertError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Free-form key/value context attached to a notification
pub type NotificationContext = HashMap<String, String>;

/// Outbound notification collaborator
#[async_trait]
pub trait AlertingService: Send + Sync {
    async fn notify(
        &self,
        kind: &str,
        severity: Severity,
        message: &str,
        context: &NotificationContext,
    ) -> Result<(), AlertError>;
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertingService;

#[async_trait]
impl AlertingService for LogAlertingService {
    async fn notify(
        &self,
        kind: &str,
        severity: Severity,
        message: &str,
        context: &NotificationContext,
    ) -> Result<(), AlertError> {
        match severity {
            Severity::Critical => error!(kind, severity = %severity, ?context, "{}", message),
            Severity::High | Severity::Warning => {
                warn!(kind, severity = %severity, ?context, "{}", message)
            }
            Severity::None => info!(kind, ?context, "{}", message),
        }
        Ok(())
    }
}

struct GateState {
    last_sent: HashMap<(String, Severity), Instant>,
    hourly_count: usize,
    hour_start: Instant,
}

/// Cooldown and hourly throttle for outbound notifications
pub struct NotificationGate {
    cooldown: Duration,
    max_per_hour: usize,
    state: Mutex<GateState>,
}

impl NotificationGate {
    pub fn new(cooldown: Duration, max_per_hour: usize) -> Self {
        Self {
            cooldown,
            max_per_hour,
            state: Mutex::new(GateState {
                last_sent: HashMap::new(),
                hourly_count: 0,
                hour_start: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &AlertConfig) -> Self {
        Self::new(
            Duration::from_secs(config.cooldown_seconds),
            config.max_alerts_per_hour,
        )
    }

    pub fn try_acquire(&self, subject_id: &str, severity: Severity) -> bool {
        self.try_acquire_at(subject_id, severity, Instant::now())
    }

    /// Check and record in one step. Critical notifications bypass the
    /// hourly cap but still honour the cooldown.
    pub fn try_acquire_at(&self, subject_id: &str, severity: Severity, now: Instant) -> bool {
        let mut state = self.state.lock();

        if now.saturating_duration_since(state.hour_start) > Duration::from_secs(3600) {
            state.hourly_count = 0;
            state.hour_start = now;
        }

        let key = (subject_id.to_string(), severity);
        if let Some(last) = state.last_sent.get(&key) {
            if now.saturating_duration_since(*last) < self.cooldown {
                debug!(subject = subject_id, severity = %severity, "Notification in cooldown");
                return false;
            }
        }

        if severity != Severity::Critical && state.hourly_count >= self.max_per_hour {
            warn!(subject = subject_id, "Notification throttled: max alerts per hour reached");
            return false;
        }

        state.hourly_count += 1;
        state.last_sent.insert(key, now);
        true
    }

    /// Notifications sent in the current hour
    pub fn hourly_count(&self) -> usize {
        self.state.lock().hourly_count
    }

    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    /// Forget every (subject, severity) whose cooldown has run out. Returns
    /// the number of entries removed.
    pub fn prune_at(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let before = state.last_sent.len();
        let cooldown = self.cooldown;
        state
            .last_sent
            .retain(|_, last| now.saturating_duration_since(*last) < cooldown);
        before - state.last_sent.len()
    }

    /// (subject, severity) pairs currently tracked
    pub fn tracked(&self) -> usize {
        self.state.lock().last_sent.len()
    }
}

/// Result of dispatching a transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent,
    /// Suppressed by cooldown or throttle
    Suppressed,
    /// Transition kind does not notify
    NotRequired,
    /// Delivery failed; logged, never propagated
    Failed(String),
}

/// Sends escalation notifications through the gate
pub struct AlertDispatcher {
    service: Arc<dyn AlertingService>,
    gate: NotificationGate,
}

impl AlertDispatcher {
    pub fn new(service: Arc<dyn AlertingService>, gate: NotificationGate) -> Self {
        Self { service, gate }
    }

    pub async fn dispatch(&self, transition: &Transition) -> DispatchOutcome {
        if transition.kind != TransitionKind::Escalate {
            return DispatchOutcome::NotRequired;
        }
        if !self.gate.try_acquire(&transition.subject_id, transition.to) {
            return DispatchOutcome::Suppressed;
        }

        let context = transition_context(transition);
        match self
            .service
            .notify("ALERT_ESCALATED", transition.to, &transition.message(), &context)
            .await
        {
            Ok(()) => DispatchOutcome::Sent,
            Err(e) => {
                warn!(subject = %transition.subject_id, error = %e, "Alert notification failed");
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }

    pub fn service(&self) -> &Arc<dyn AlertingService> {
        &self.service
    }

    pub fn gate(&self) -> &NotificationGate {
        &self.gate
    }
}

fn transition_context(transition: &Transition) -> NotificationContext {
    let mut context = NotificationContext::new();
    context.insert("subjectId".into(), transition.subject_id.clone());
    context.insert("metricKind".into(), transition.metric_kind.clone());
    context.insert("value".into(), format!("{:.4}", transition.value));
    context.insert("threshold".into(), format!("{:.4}", transition.threshold));
    context.insert("runLength".into(), transition.run_length.to_string());
    context.insert("anomalyScore".into(), format!("{:.2}", transition.anomaly_score));
    if let Some(incident) = &transition.incident_id {
        context.insert("incidentId".into(), incident.clone());
    }
    context
}
