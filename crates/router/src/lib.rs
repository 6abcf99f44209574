//! Event Router
//!
//! Drives every inbound envelope to exactly one terminal outcome:
//! dedup, handler execution through the resilience chain, alert state
//! tracking for the handler's metric and a single acknowledgment.

mod ack;
mod handler;
mod maintenance;
mod router;
mod settings;

pub use ack::AckHandle;
pub use handler::{
    DomainHandler, HandlerOutput, HandlerRegistration, MetricEventHandler, MetricObservation,
};
pub use maintenance::{spawn_maintenance, MaintenanceReport};
pub use router::{Collaborators, EventRouter, RouteOutcome, RouterStats};
pub use settings::{load_layered, ConfigError, CoreConfig, DeadLetterSettings, ENV_PREFIX};

use thiserror::Error;

/// Router construction errors
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Alert(#[from] alerting::AlertError),
}
