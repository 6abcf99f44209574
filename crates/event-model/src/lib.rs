//! Event Model
//!
//! Inbound envelope, idempotency key derivation, criticality tiers and the
//! failure taxonomy shared by every stage of the routing pipeline.

mod envelope;
mod error;
mod key;
mod payload;
mod tier;

pub use envelope::EventEnvelope;
pub use error::{FailureClass, HandlerError, ValidationError};
pub use key::IdempotencyKey;
pub use payload::PayloadReader;
pub use tier::CriticalityTier;
