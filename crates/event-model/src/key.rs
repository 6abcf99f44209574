//! Idempotency Key Derivation

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::envelope::EventEnvelope;

/// Identifier used to recognise logical duplicates.
///
/// Derivation order: explicit event id (`id:`), then subject + type +
/// producer timestamp (`ev:`), then broker coordinates (`at:`, a redelivery
/// keeps its offset). Components are escaped so no two distinct component
/// lists render to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

const SEPARATOR: char = ':';
const ESCAPE: char = '\\';

impl IdempotencyKey {
    /// Derive the key for an envelope
    pub fn derive(envelope: &EventEnvelope) -> Self {
        if let Some(event_id) = envelope.event_id().filter(|id| !id.is_empty()) {
            return Self::tagged("id", &[event_id]);
        }

        match envelope.occurred_at() {
            Some(occurred_at) => Self::tagged(
                "ev",
                &[
                    envelope.subject_id(),
                    envelope.event_type(),
                    occurred_at.timestamp_millis().to_string().as_str(),
                ],
            ),
            None => Self::tagged(
                "at",
                &[
                    envelope.source_topic(),
                    envelope.partition().to_string().as_str(),
                    envelope.offset().to_string().as_str(),
                ],
            ),
        }
    }

    fn tagged(tag: &str, components: &[&str]) -> Self {
        let mut key = String::from(tag);
        for component in components {
            key.push(SEPARATOR);
            for ch in component.chars() {
                if ch == SEPARATOR || ch == ESCAPE {
                    key.push(ESCAPE);
                }
                key.push(ch);
            }
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for IdempotencyKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for IdempotencyKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
