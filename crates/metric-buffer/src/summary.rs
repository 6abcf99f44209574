//! Summary Statistics

use serde::{Deserialize, Serialize};

/// Statistics over a chronological window of values
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferSummary {
    /// Number of samples
    pub count: usize,
    /// Mean value
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    /// Minimum value
    pub min: f64,
    /// Maximum value
    pub max: f64,
    /// Newest value
    pub last: f64,
    /// Mean absolute change between consecutive samples
    pub rate_of_change: f64,
}

impl BufferSummary {
    /// Compute summary statistics from values in chronological order.
    /// Returns `None` for an empty slice.
    pub fn compute(values: &[f64]) -> Option<Self> {
        let last = *values.last()?;
        let n = values.len() as f64;

        let mean = values.iter().sum::<f64>() / n;
        let min = values.iter().cloned().fold(f64::MAX, f64::min);
        let max = values.iter().cloned().fold(f64::MIN, f64::max);

        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        let rate_of_change = if values.len() >= 2 {
            let total: f64 = values.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
            total / (values.len() - 1) as f64
        } else {
            0.0
        };

        Some(Self {
            count: values.len(),
            mean,
            std_dev: variance.sqrt(),
            min,
            max,
            last,
            rate_of_change,
        })
    }

    /// Z-score of `value` against this window; zero when the window is flat
    pub fn z_score(&self, value: f64) -> f64 {
        if self.std_dev > 0.0 {
            (value - self.mean) / self.std_dev
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_computation() {
        let summary = BufferSummary::compute(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(summary.count, 5);
        assert!((summary.mean - 3.0).abs() < 0.001);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 5.0);
        assert_eq!(summary.last, 5.0);
        assert!((summary.rate_of_change - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_empty_values() {
        assert!(BufferSummary::compute(&[]).is_none());
    }

    #[test]
    fn test_z_score() {
        let summary = BufferSummary::compute(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((summary.z_score(9.0) - 2.0).abs() < 1e-9);

        let flat = BufferSummary::compute(&[3.0, 3.0]).unwrap();
        assert_eq!(flat.z_score(10.0), 0.0);
    }
}
