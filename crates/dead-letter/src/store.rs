//! In-memory dead-letter store

use crate::record::{DeadLetterRecord, DeadLetterStatus};
use crate::{DeadLetterError, DeadLetterSink};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// Bounded dead-letter store (in-memory implementation)
pub struct InMemoryDeadLetterStore {
    records: Mutex<VecDeque<DeadLetterRecord>>,
    /// Records are evicted beyond this, oldest `Queued` first
    max_records: usize,
    unreviewed_evictions: AtomicU64,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::with_retention(10_000)
    }

    pub fn with_retention(max_records: usize) -> Self {
        info!(max_records, "Creating in-memory dead-letter store");
        Self {
            records: Mutex::new(VecDeque::with_capacity(max_records.min(1024))),
            max_records: max_records.max(1),
            unreviewed_evictions: AtomicU64::new(0),
        }
    }

    /// Insert or update a record by id
    pub fn insert(&self, record: DeadLetterRecord) -> Result<(), DeadLetterError> {
        let mut records = self.records.lock();

        if let Some(existing) = records.iter_mut().find(|r| r.id == record.id) {
            *existing = record;
            return Ok(());
        }

        while records.len() >= self.max_records {
            self.evict_one(&mut records);
        }

        debug!(id = %record.id, status = ?record.status, "Stored dead-letter record");
        records.push_back(record);
        Ok(())
    }

    /// Records awaiting an operator are only evicted when nothing else is left
    fn evict_one(&self, records: &mut VecDeque<DeadLetterRecord>) {
        let queued = records
            .iter()
            .position(|r| r.status == DeadLetterStatus::Queued);
        match queued.and_then(|index| records.remove(index)) {
            Some(evicted) => {
                warn!(id = %evicted.id, "Dead-letter retention exceeded, evicting oldest queued record");
            }
            None => {
                if let Some(evicted) = records.pop_front() {
                    self.unreviewed_evictions.fetch_add(1, Ordering::Relaxed);
                    error!(
                        id = %evicted.id,
                        at = %evicted.envelope.coordinates(),
                        "Dead-letter retention exhausted by records awaiting review, evicting oldest"
                    );
                }
            }
        }
    }

    /// Records dropped while still requiring manual intervention
    pub fn unreviewed_evictions(&self) -> u64 {
        self.unreviewed_evictions.load(Ordering::Relaxed)
    }

    /// Most recent records first, optionally filtered by status
    pub fn list(&self, status: Option<DeadLetterStatus>, limit: usize) -> Vec<DeadLetterRecord> {
        self.records
            .lock()
            .iter()
            .rev()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<DeadLetterRecord> {
        self.records.lock().iter().find(|r| r.id == id).cloned()
    }

    pub fn count_by_status(&self, status: DeadLetterStatus) -> usize {
        self.records.lock().iter().filter(|r| r.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Clear all records (for testing)
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Default for InMemoryDeadLetterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterStore {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError> {
        let mut queued = record.clone();
        queued.status = DeadLetterStatus::Queued;
        self.insert(queued)
    }
}
