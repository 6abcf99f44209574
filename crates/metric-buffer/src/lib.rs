//! Windowed Metric Buffer
//!
//! Fixed-capacity circular buffer of numeric samples with summary
//! statistics, shared between the ingest path and snapshot readers.

mod buffer;
mod summary;

pub use buffer::{WindowedMetricBuffer, DEFAULT_CAPACITY};
pub use summary::BufferSummary;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sample held in the buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowSample {
    pub timestamp_ms: u64,
    pub value: f64,
}

/// Buffer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("Buffer capacity must be greater than zero")]
    InvalidCapacity,
    #[error("Buffer is empty")]
    Empty,
}
