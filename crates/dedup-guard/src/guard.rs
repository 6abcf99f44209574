//! Dedup Guard Implementation

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use event_model::IdempotencyKey;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Longest suppression window a key can be given
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

/// Dedup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// How long an admitted key suppresses duplicates (default: 24h)
    pub ttl_secs: u64,
    /// Table size that triggers an inline sweep (default: 1000)
    pub sweep_watermark: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 3600,
            sweep_watermark: 1000,
        }
    }
}

impl DedupConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs).min(MAX_TTL)
    }
}

/// Admission record for one idempotency key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupRecord {
    pub key: IdempotencyKey,
    pub first_seen_at: Instant,
    pub expires_at: Instant,
}

impl DedupRecord {
    fn new(key: IdempotencyKey, now: Instant, ttl: Duration) -> Self {
        Self {
            key,
            first_seen_at: now,
            expires_at: now
                .checked_add(ttl.min(MAX_TTL))
                .or_else(|| now.checked_add(Duration::from_secs(3600)))
                .unwrap_or(now),
        }
    }

    /// Expired records are logically absent even before they are swept
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Counters exposed for health reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub entries: usize,
    pub admitted_total: u64,
    pub duplicate_total: u64,
    pub swept_total: u64,
}

/// TTL-indexed set of idempotency keys.
///
/// Admission is an atomic check-then-set on the key's shard, so two workers
/// racing on the same duplicate can never both be admitted. Unrelated keys
/// only contend when they hash to the same shard.
pub struct DedupGuard {
    config: DedupConfig,
    entries: DashMap<IdempotencyKey, DedupRecord>,
    /// Table size at which the next inline sweep runs
    sweep_trigger: AtomicUsize,
    admitted_total: AtomicU64,
    duplicate_total: AtomicU64,
    swept_total: AtomicU64,
}

impl DedupGuard {
    /// Create a new guard
    pub fn new(config: DedupConfig) -> Self {
        info!(
            ttl_secs = config.ttl_secs,
            watermark = config.sweep_watermark,
            "Creating dedup guard"
        );
        Self {
            sweep_trigger: AtomicUsize::new(config.sweep_watermark.max(1)),
            config,
            entries: DashMap::new(),
            admitted_total: AtomicU64::new(0),
            duplicate_total: AtomicU64::new(0),
            swept_total: AtomicU64::new(0),
        }
    }

    /// Admit `key` with the configured TTL
    pub fn admit(&self, key: &IdempotencyKey) -> bool {
        self.admit_at(key, self.config.ttl(), Instant::now())
    }

    /// Admit `key` with an explicit TTL
    pub fn admit_with_ttl(&self, key: &IdempotencyKey, ttl: Duration) -> bool {
        self.admit_at(key, ttl, Instant::now())
    }

    /// Returns `true` the first time `key` is seen within its TTL window and
    /// `false` for a duplicate, in which case the caller must skip all side
    /// effects.
    pub fn admit_at(&self, key: &IdempotencyKey, ttl: Duration, now: Instant) -> bool {
        let admitted = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_expired(now) {
                    entry.insert(DedupRecord::new(key.clone(), now, ttl));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(DedupRecord::new(key.clone(), now, ttl));
                true
            }
        };

        if !admitted {
            self.duplicate_total.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Duplicate event suppressed");
            return false;
        }

        self.admitted_total.fetch_add(1, Ordering::Relaxed);
        if self.entries.len() >= self.sweep_trigger.load(Ordering::Relaxed) {
            self.sweep_at(now);
        }
        true
    }

    /// Whether `key` is currently suppressing duplicates
    pub fn contains(&self, key: &IdempotencyKey) -> bool {
        self.contains_at(key, Instant::now())
    }

    pub fn contains_at(&self, key: &IdempotencyKey, now: Instant) -> bool {
        self.entries
            .get(key)
            .map(|record| !record.is_expired(now))
            .unwrap_or(false)
    }

    /// Remove every expired entry
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Remove every entry with `expires_at <= now`. Locks one shard at a time.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut removed = 0usize;
        self.entries.retain(|_, record| {
            let keep = !record.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });

        // Live entries above the watermark would otherwise trigger a full
        // sweep on every admission.
        let remaining = self.entries.len();
        let watermark = self.config.sweep_watermark.max(1);
        let next_trigger = if remaining >= watermark {
            remaining + watermark
        } else {
            watermark
        };
        self.sweep_trigger.store(next_trigger, Ordering::Relaxed);

        self.swept_total.fetch_add(removed as u64, Ordering::Relaxed);
        if removed > 0 {
            info!(removed, remaining, "Swept expired dedup entries");
        }
        removed
    }

    /// Number of physically present entries, expired or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            entries: self.entries.len(),
            admitted_total: self.admitted_total.load(Ordering::Relaxed),
            duplicate_total: self.duplicate_total.load(Ordering::Relaxed),
            swept_total: self.swept_total.load(Ordering::Relaxed),
        }
    }
}

impl Default for DedupGuard {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}
