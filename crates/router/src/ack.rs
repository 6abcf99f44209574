//! Broker acknowledgment handle

use tracing::error;

type AckFn = Box<dyn FnOnce() + Send + 'static>;

/// One-shot acknowledgment callback supplied with each envelope.
///
/// Consumed by [`AckHandle::acknowledge`], so it cannot fire twice.
pub struct AckHandle {
    callback: Option<AckFn>,
    coordinates: String,
}

impl AckHandle {
    pub fn new<F>(coordinates: impl Into<String>, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
            coordinates: coordinates.into(),
        }
    }

    /// Handle for callers that commit offsets elsewhere
    pub fn noop(coordinates: impl Into<String>) -> Self {
        Self::new(coordinates, || {})
    }

    pub fn acknowledge(mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }

    pub fn coordinates(&self) -> &str {
        &self.coordinates
    }
}

impl Drop for AckHandle {
    fn drop(&mut self) {
        if self.callback.is_some() {
            error!(at = %self.coordinates, "Envelope dropped without acknowledgment");
        }
    }
}

impl std::fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckHandle")
            .field("coordinates", &self.coordinates)
            .field("pending", &self.callback.is_some())
            .finish()
    }
}
