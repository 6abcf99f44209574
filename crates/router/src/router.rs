//! Event router

use crate::ack::AckHandle;
use crate::handler::HandlerRegistration;
use crate::maintenance::MaintenanceReport;
use crate::settings::CoreConfig;
use crate::RouterError;
use alerting::{
    AlertDispatcher, AlertStateTracker, AlertingService, DispatchOutcome, LogAlertingService,
    NotificationGate, Transition,
};
use chrono::Utc;
use dashmap::DashMap;
use dead_letter::{
    AuditService, DeadLetterHandler, DeadLetterSink, InMemoryAuditLog, InMemoryDeadLetterStore,
};
use dedup_guard::DedupGuard;
use event_model::{EventEnvelope, IdempotencyKey};
use metric_buffer::WindowedMetricBuffer;
use resilience::{CircuitStats, FallbackPath, FallbackReport, Outcome, ResilienceChain};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// External ports the router talks to
#[derive(Clone)]
pub struct Collaborators {
    pub alerting: Arc<dyn AlertingService>,
    pub audit: Arc<dyn AuditService>,
    /// Where failed envelopes are published
    pub sink: Arc<dyn DeadLetterSink>,
    /// Escalated records awaiting manual intervention
    pub dead_letters: Arc<InMemoryDeadLetterStore>,
}

impl Collaborators {
    /// Log-only alerting, in-memory audit and in-memory dead-letter store
    pub fn in_memory(config: &CoreConfig) -> Self {
        let store = Arc::new(InMemoryDeadLetterStore::with_retention(
            config.dead_letter.retention,
        ));
        Self {
            alerting: Arc::new(LogAlertingService),
            audit: Arc::new(InMemoryAuditLog::default()),
            sink: store.clone(),
            dead_letters: store,
        }
    }
}

/// Terminal outcome of routing one envelope
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RouteOutcome {
    /// Key already seen within its TTL
    Duplicate { key: String },
    /// No handler registered for the event type
    Unhandled { event_type: String },
    Processed {
        transition: Option<Transition>,
        notification: Option<DispatchOutcome>,
    },
    Failed(FallbackReport),
}

impl RouteOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Duplicate { .. } => "duplicate",
            Self::Unhandled { .. } => "unhandled",
            Self::Processed { .. } => "processed",
            Self::Failed(_) => "failed",
        }
    }
}

/// Routing counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub received: u64,
    pub duplicates: u64,
    pub unhandled: u64,
    pub processed: u64,
    pub failed: u64,
    pub transitions: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    duplicates: AtomicU64,
    unhandled: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    transitions: AtomicU64,
}

/// Single entry point for inbound envelopes.
///
/// Every envelope ends in exactly one [`RouteOutcome`] and its
/// [`AckHandle`] is consumed exactly once, after that outcome is reached.
pub struct EventRouter {
    config: CoreConfig,
    dedup: DedupGuard,
    tracker: AlertStateTracker,
    dispatcher: AlertDispatcher,
    fallback: Arc<FallbackPath>,
    dead_letters: Arc<InMemoryDeadLetterStore>,
    handlers: DashMap<String, HandlerRegistration>,
    chains: DashMap<String, Arc<ResilienceChain>>,
    windows: DashMap<(String, String), Arc<WindowedMetricBuffer>>,
    counters: Counters,
}

impl EventRouter {
    pub fn new(config: CoreConfig, collaborators: Collaborators) -> Result<Self, RouterError> {
        config.validate()?;

        let tracker = AlertStateTracker::new(config.alerting.clone())?;
        let dispatcher = AlertDispatcher::new(
            collaborators.alerting.clone(),
            NotificationGate::from_config(&config.alerting),
        );
        let escalation = Arc::new(DeadLetterHandler::new(
            collaborators.dead_letters.clone(),
            collaborators.alerting.clone(),
            collaborators.audit.clone(),
        ));
        let fallback = FallbackPath::new(
            config.consumer_name.clone(),
            collaborators.sink,
            collaborators.audit,
            collaborators.alerting,
        )
        .with_escalation(escalation);

        info!(consumer = %config.consumer_name, "Event router created");

        Ok(Self {
            dedup: DedupGuard::new(config.dedup.clone()),
            tracker,
            dispatcher,
            fallback: Arc::new(fallback),
            dead_letters: collaborators.dead_letters,
            handlers: DashMap::new(),
            chains: DashMap::new(),
            windows: DashMap::new(),
            counters: Counters::default(),
            config,
        })
    }

    /// Route on a spawned task; dropping the returned handle does not
    /// cancel routing.
    pub fn route_detached(
        self: &Arc<Self>,
        envelope: EventEnvelope,
        ack: AckHandle,
    ) -> JoinHandle<RouteOutcome> {
        let router = Arc::clone(self);
        tokio::spawn(async move { router.route(envelope, ack).await })
    }

    /// Register the handler for `event_type`, replacing any previous one
    pub fn register(&self, event_type: impl Into<String>, registration: HandlerRegistration) {
        let event_type = event_type.into();
        self.chain_for(&registration.operation_class);
        info!(
            event_type = %event_type,
            tier = %registration.tier,
            circuit = %registration.operation_class,
            "Registered handler"
        );
        self.handlers.insert(event_type, registration);
    }

    /// Drive one envelope to its terminal outcome and acknowledge it.
    ///
    /// The idempotency key is admitted before the handler runs, so this
    /// future must be polled to completion: dropping it part way leaves the
    /// envelope unacknowledged and every redelivery is skipped as a
    /// duplicate. Callers that can be cancelled use [`Self::route_detached`].
    pub async fn route(&self, envelope: EventEnvelope, ack: AckHandle) -> RouteOutcome {
        let started = Instant::now();
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let key = IdempotencyKey::derive(&envelope);
        if !self.dedup.admit(&key) {
            debug!(key = %key, at = %envelope.coordinates(), "Duplicate event skipped");
            return self.finish(RouteOutcome::Duplicate { key: key.to_string() }, ack, started);
        }

        let Some(registration) = self
            .handlers
            .get(envelope.event_type())
            .map(|entry| entry.value().clone())
        else {
            warn!(
                event_type = envelope.event_type(),
                at = %envelope.coordinates(),
                "No handler registered, skipping"
            );
            let outcome = RouteOutcome::Unhandled {
                event_type: envelope.event_type().to_string(),
            };
            return self.finish(outcome, ack, started);
        };

        let chain = self.chain_for(&registration.operation_class);
        let handler = &registration.handler;
        let outcome = chain
            .execute(&envelope, registration.tier, || handler.handle(&envelope))
            .await;

        let outcome = match outcome {
            Outcome::Success(output) => match output.observation {
                Some(observation) => {
                    let subject = observation
                        .subject_id
                        .as_deref()
                        .unwrap_or_else(|| envelope.subject_id())
                        .to_string();
                    let at = envelope.effective_time();
                    self.window(&subject, &observation.metric_kind)
                        .add_at(at.timestamp_millis().max(0) as u64, observation.value);

                    let transition = self.tracker.observe(
                        &subject,
                        &observation.metric_kind,
                        observation.value,
                        observation.threshold,
                        at,
                    );
                    let notification = match &transition {
                        Some(transition) => {
                            self.counters.transitions.fetch_add(1, Ordering::Relaxed);
                            Some(self.dispatcher.dispatch(transition).await)
                        }
                        None => None,
                    };
                    RouteOutcome::Processed {
                        transition,
                        notification,
                    }
                }
                None => RouteOutcome::Processed {
                    transition: None,
                    notification: None,
                },
            },
            Outcome::Failed(report) => {
                metrics::counter!("telemetry_guard_dead_letter_total", "class" => report.failure_class.as_str())
                    .increment(1);
                RouteOutcome::Failed(report)
            }
        };

        self.finish(outcome, ack, started)
    }

    fn finish(&self, outcome: RouteOutcome, ack: AckHandle, started: Instant) -> RouteOutcome {
        ack.acknowledge();

        let counter = match &outcome {
            RouteOutcome::Duplicate { .. } => &self.counters.duplicates,
            RouteOutcome::Unhandled { .. } => &self.counters.unhandled,
            RouteOutcome::Processed { .. } => &self.counters.processed,
            RouteOutcome::Failed(_) => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        metrics::counter!("telemetry_guard_events_total", "outcome" => outcome.label()).increment(1);
        metrics::histogram!("telemetry_guard_processing_seconds")
            .record(started.elapsed().as_secs_f64());
        outcome
    }

    fn chain_for(&self, operation_class: &str) -> Arc<ResilienceChain> {
        self.chains
            .entry(operation_class.to_string())
            .or_insert_with(|| {
                Arc::new(ResilienceChain::new(
                    operation_class,
                    &self.config.resilience,
                    self.fallback.clone(),
                ))
            })
            .clone()
    }

    /// Sliding window for `(subject_id, metric_kind)`, created on first use
    pub fn window(&self, subject_id: &str, metric_kind: &str) -> Arc<WindowedMetricBuffer> {
        self.windows
            .entry((subject_id.to_string(), metric_kind.to_string()))
            .or_insert_with(|| {
                Arc::new(
                    WindowedMetricBuffer::new(self.config.buffer_capacity)
                        .unwrap_or_else(|_| WindowedMetricBuffer::with_default_capacity()),
                )
            })
            .clone()
    }

    /// Existing window only
    pub fn window_if_present(
        &self,
        subject_id: &str,
        metric_kind: &str,
    ) -> Option<Arc<WindowedMetricBuffer>> {
        self.windows
            .get(&(subject_id.to_string(), metric_kind.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn acknowledge_alert(&self, subject_id: &str, metric_kind: &str) -> Option<Transition> {
        self.tracker.acknowledge(subject_id, metric_kind, Utc::now())
    }

    pub fn resolve_alert(&self, subject_id: &str, metric_kind: &str) -> Option<Transition> {
        self.tracker.resolve(subject_id, metric_kind, Utc::now())
    }

    /// Sweep expired dedup keys, forget idle alert states and their windows,
    /// and drop notification cooldowns that have run out
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let swept = self.dedup.sweep();
        let decayed = self.tracker.decay_idle(self.config.idle_ttl(), Utc::now());
        if decayed > 0 {
            self.windows
                .retain(|(subject, metric), _| self.tracker.state(subject, metric).is_some());
        }
        let pruned = self.dispatcher.gate().prune();
        MaintenanceReport {
            swept,
            decayed,
            pruned,
        }
    }

    pub fn tracker(&self) -> &AlertStateTracker {
        &self.tracker
    }

    pub fn dedup(&self) -> &DedupGuard {
        &self.dedup
    }

    pub fn dead_letters(&self) -> &Arc<InMemoryDeadLetterStore> {
        &self.dead_letters
    }

    /// Circuit snapshots, sorted by operation class
    pub fn circuits(&self) -> Vec<CircuitStats> {
        let mut stats: Vec<_> = self.chains.iter().map(|chain| chain.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            received: self.counters.received.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            unhandled: self.counters.unhandled.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            transitions: self.counters.transitions.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }
}
