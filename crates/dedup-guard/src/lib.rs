//! Delivery Guard
//!
//! Recognises redelivered events within a TTL window so side effects fire at
//! most once per logical event.

mod guard;

pub use guard::{DedupConfig, DedupGuard, DedupRecord, DedupStats, MAX_TTL};
