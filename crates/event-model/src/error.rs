//! Handler Error Types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while validating an inbound payload
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Value out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Field present but of the wrong JSON type
    #[error("Field {field} must be {expected}")]
    InvalidType {
        field: String,
        expected: &'static str,
    },

    /// Invalid data format
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Failure returned by a domain handler.
///
/// Only [`HandlerError::Permanent`] bypasses the retry budget; timeouts are
/// accounted exactly like transient failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HandlerError {
    /// Dependency hiccup, worth retrying
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Malformed payload or missing field; retrying cannot help
    #[error("Validation failed: {0}")]
    Permanent(#[from] ValidationError),

    /// Handler exceeded its execution budget
    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),
}

impl HandlerError {
    /// Shorthand for a transient failure
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    /// Whether the retry policy may attempt the operation again
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }

    /// Failure class recorded on audit entries and dead-letter records
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Transient(_) => FailureClass::TransientFailure,
            Self::Permanent(_) => FailureClass::ValidationFailed,
            Self::Timeout(_) => FailureClass::Timeout,
        }
    }
}

/// Classification attached to terminal failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureClass {
    TransientFailure,
    ValidationFailed,
    Timeout,
    CircuitOpen,
    RetriesExhausted,
}

impl FailureClass {
    /// Wire representation, as written to the dead-letter topic
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientFailure => "TRANSIENT_FAILURE",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::RetriesExhausted => "RETRIES_EXHAUSTED",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
