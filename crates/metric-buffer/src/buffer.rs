//! Circular Sample Buffer

use crate::summary::BufferSummary;
use crate::{BufferError, WindowSample};
use parking_lot::Mutex;

/// Default buffer capacity (one hour of minute-level samples)
pub const DEFAULT_CAPACITY: usize = 60;

/// Storage guarded by the buffer lock
#[derive(Debug)]
struct Ring {
    slots: Vec<WindowSample>,
    /// Next slot to overwrite once the ring is full
    head: usize,
    total_written: u64,
}

impl Ring {
    fn chronological(&self) -> impl Iterator<Item = &WindowSample> {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    fn values(&self) -> Vec<f64> {
        self.chronological().map(|s| s.value).collect()
    }
}

/// Fixed-capacity buffer of numeric samples.
///
/// Once full, each insert overwrites the oldest sample. Every read and write
/// takes the same lock, so a snapshot never observes a half-applied insert.
#[derive(Debug)]
pub struct WindowedMetricBuffer {
    capacity: usize,
    ring: Mutex<Ring>,
}

impl WindowedMetricBuffer {
    /// Create a new buffer with given capacity
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::InvalidCapacity);
        }
        Ok(Self {
            capacity,
            ring: Mutex::new(Ring {
                slots: Vec::with_capacity(capacity),
                head: 0,
                total_written: 0,
            }),
        })
    }

    /// Create a buffer with default capacity
    pub fn with_default_capacity() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            ring: Mutex::new(Ring {
                slots: Vec::with_capacity(DEFAULT_CAPACITY),
                head: 0,
                total_written: 0,
            }),
        }
    }

    /// Add a sample stamped with the current wall-clock time
    pub fn add(&self, value: f64) {
        self.add_at(now_ms(), value);
    }

    /// Add a sample with an explicit timestamp (overwrites oldest if full)
    pub fn add_at(&self, timestamp_ms: u64, value: f64) {
        let sample = WindowSample { timestamp_ms, value };
        let mut ring = self.ring.lock();
        if ring.slots.len() < self.capacity {
            ring.slots.push(sample);
        } else {
            let head = ring.head;
            ring.slots[head] = sample;
            ring.head = (head + 1) % self.capacity;
        }
        ring.total_written += 1;
    }

    /// Values in chronological order (oldest first)
    pub fn values(&self) -> Vec<f64> {
        self.ring.lock().values()
    }

    /// Samples in chronological order (oldest first)
    pub fn samples(&self) -> Vec<WindowSample> {
        self.ring.lock().chronological().copied().collect()
    }

    /// Samples whose timestamp falls within the last `duration_ms`
    pub fn read_window(&self, duration_ms: u64) -> Vec<WindowSample> {
        let cutoff = now_ms().saturating_sub(duration_ms);
        self.ring
            .lock()
            .chronological()
            .filter(|s| s.timestamp_ms >= cutoff)
            .copied()
            .collect()
    }

    /// Oldest retained sample
    pub fn first(&self) -> Result<WindowSample, BufferError> {
        self.ring.lock().chronological().next().copied().ok_or(BufferError::Empty)
    }

    /// Newest sample
    pub fn last(&self) -> Result<WindowSample, BufferError> {
        self.ring.lock().chronological().last().copied().ok_or(BufferError::Empty)
    }

    pub fn min(&self) -> Result<f64, BufferError> {
        self.ring
            .lock()
            .chronological()
            .map(|s| s.value)
            .reduce(f64::min)
            .ok_or(BufferError::Empty)
    }

    pub fn max(&self) -> Result<f64, BufferError> {
        self.ring
            .lock()
            .chronological()
            .map(|s| s.value)
            .reduce(f64::max)
            .ok_or(BufferError::Empty)
    }

    /// Mean over every retained sample
    pub fn average(&self) -> Result<f64, BufferError> {
        let ring = self.ring.lock();
        mean(ring.slots.iter().map(|s| s.value), ring.slots.len())
    }

    /// Mean of the newest `window` samples; the window is clamped to
    /// `1..=len`
    pub fn moving_average(&self, window: usize) -> Result<f64, BufferError> {
        let ring = self.ring.lock();
        let len = ring.slots.len();
        if len == 0 {
            return Err(BufferError::Empty);
        }
        let window = window.clamp(1, len);
        mean(ring.chronological().skip(len - window).map(|s| s.value), window)
    }

    /// Population standard deviation: `sqrt(Σ(x - mean)² / n)`
    pub fn standard_deviation(&self) -> Result<f64, BufferError> {
        let ring = self.ring.lock();
        let n = ring.slots.len();
        let mean = mean(ring.slots.iter().map(|s| s.value), n)?;
        let sum_sq: f64 = ring.slots.iter().map(|s| (s.value - mean).powi(2)).sum();
        Ok((sum_sq / n as f64).sqrt())
    }

    /// All statistics computed from one consistent snapshot
    pub fn summary(&self) -> Result<BufferSummary, BufferError> {
        let values = self.values();
        BufferSummary::compute(&values).ok_or(BufferError::Empty)
    }

    /// Get the number of samples currently in the buffer
    pub fn len(&self) -> usize {
        self.ring.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    /// Total samples ever written, including overwritten ones
    pub fn total_written(&self) -> u64 {
        self.ring.lock().total_written
    }

    /// Clear the buffer
    pub fn clear(&self) {
        let mut ring = self.ring.lock();
        ring.slots.clear();
        ring.head = 0;
    }
}

fn mean(values: impl Iterator<Item = f64>, n: usize) -> Result<f64, BufferError> {
    if n == 0 {
        return Err(BufferError::Empty);
    }
    Ok(values.sum::<f64>() / n as f64)
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(WindowedMetricBuffer::new(0).unwrap_err(), BufferError::InvalidCapacity);
    }

    #[test]
    fn test_capacity_five_scenario() {
        let buffer = WindowedMetricBuffer::new(5).unwrap();
        for v in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0] {
            buffer.add(v);
        }

        assert_eq!(buffer.values(), vec![20.0, 30.0, 40.0, 50.0, 60.0]);
        assert_eq!(buffer.min().unwrap(), 20.0);
        assert_eq!(buffer.max().unwrap(), 60.0);
        assert!((buffer.average().unwrap() - 40.0).abs() < 1e-9);
        assert_eq!(buffer.total_written(), 6);
        assert!(buffer.is_full());
    }

    #[test]
    fn test_empty_buffer_errors() {
        let buffer = WindowedMetricBuffer::new(3).unwrap();
        assert_eq!(buffer.first(), Err(BufferError::Empty));
        assert_eq!(buffer.last(), Err(BufferError::Empty));
        assert_eq!(buffer.min(), Err(BufferError::Empty));
        assert_eq!(buffer.max(), Err(BufferError::Empty));
        assert_eq!(buffer.average(), Err(BufferError::Empty));
        assert_eq!(buffer.moving_average(2), Err(BufferError::Empty));
        assert_eq!(buffer.standard_deviation(), Err(BufferError::Empty));
        assert!(buffer.values().is_empty());
    }

    #[test]
    fn test_first_and_last_follow_overwrites() {
        let buffer = WindowedMetricBuffer::new(3).unwrap();
        for (ts, v) in [(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)] {
            buffer.add_at(ts, v);
        }
        assert_eq!(buffer.first().unwrap(), WindowSample { timestamp_ms: 2, value: 2.0 });
        assert_eq!(buffer.last().unwrap(), WindowSample { timestamp_ms: 4, value: 4.0 });
    }

    #[test]
    fn test_moving_average_clamps_window() {
        let buffer = WindowedMetricBuffer::new(10).unwrap();
        for v in [1.0, 2.0, 3.0, 4.0] {
            buffer.add(v);
        }
        assert!((buffer.moving_average(2).unwrap() - 3.5).abs() < 1e-9);
        assert!((buffer.moving_average(100).unwrap() - 2.5).abs() < 1e-9);
        assert!((buffer.moving_average(0).unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_population_std_dev() {
        let buffer = WindowedMetricBuffer::new(8).unwrap();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            buffer.add(v);
        }
        assert!((buffer.standard_deviation().unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_values_is_restartable() {
        let buffer = WindowedMetricBuffer::new(4).unwrap();
        buffer.add(1.0);
        buffer.add(2.0);
        assert_eq!(buffer.values(), buffer.values());
    }

    #[test]
    fn test_clear() {
        let buffer = WindowedMetricBuffer::new(2).unwrap();
        buffer.add(1.0);
        buffer.add(2.0);
        buffer.add(3.0);
        buffer.clear();
        assert!(buffer.is_empty());
        buffer.add(9.0);
        assert_eq!(buffer.values(), vec![9.0]);
    }

    #[test]
    fn test_concurrent_writers_never_exceed_capacity() {
        let buffer = Arc::new(WindowedMetricBuffer::new(16).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        buffer.add((t * 1000 + i) as f64);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(buffer.len(), 16);
        assert_eq!(buffer.total_written(), 1000);
    }

    proptest! {
        #[test]
        fn prop_keeps_last_c_values(capacity in 1usize..32, extra in 1usize..64) {
            let buffer = WindowedMetricBuffer::new(capacity).unwrap();
            let inserted: Vec<f64> = (0..capacity + extra).map(|i| i as f64 * 1.5).collect();
            for v in &inserted {
                buffer.add(*v);
            }

            let expected = inserted[extra..].to_vec();
            prop_assert_eq!(buffer.values(), expected.clone());

            let direct = expected.iter().sum::<f64>() / capacity as f64;
            prop_assert!((buffer.average().unwrap() - direct).abs() < 1e-9);
        }
    }
}
