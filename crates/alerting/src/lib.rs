//! Alerting System
//!
//! Converts noisy metric samples into stable alert and recovery transitions
//! and dispatches rate-limited notifications for escalations.

mod config;
mod notifier;
mod state;
mod tracker;

pub use config::{AlertConfig, Comparator, HysteresisPolicy, MetricRule, TierRule};
pub use notifier::{
    AlertDispatcher, AlertingService, DispatchOutcome, LogAlertingService, NotificationContext,
    NotificationGate,
};
pub use state::{AlertState, Severity, Transition, TransitionKind};
pub use tracker::AlertStateTracker;

use thiserror::Error;

/// Alerting errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlertError {
    #[error("Invalid hysteresis policy: {0}")]
    InvalidPolicy(String),
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}
