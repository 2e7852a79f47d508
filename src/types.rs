//! Shared data structures for the windowed sensor-processing pipeline
//!
//! Core types flowing between the gateway, cleaner, engineer and monitor:
//! - Sample / Window: raw and cleaned per-sensor time series
//! - FeatureSet: one cycle's engineered feature map
//! - WindowCompleteness: per-window sampling coverage check

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Samples and Windows
// ============================================================================

/// One sensor reading. A missing value is represented as `f64::NAN` so a gap
/// keeps its timestamp through the cleaning stages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(time: DateTime<Utc>, value: f64) -> Self {
        Self { time, value }
    }
}

/// A fixed-duration trailing slice of a single sensor series.
///
/// The gateway is not required to return rows in time order; callers that
/// care call [`Window::sort_by_time`] on ingress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub samples: Vec<Sample>,
}

impl Window {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Build a window of 1 Hz samples starting at `start`.
    pub fn from_values(start: DateTime<Utc>, values: &[f64]) -> Self {
        let samples = values
            .iter()
            .enumerate()
            .map(|(i, &v)| Sample::new(start + chrono::Duration::seconds(i as i64), v))
            .collect();
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Values in sample order, gaps included as NaN.
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    /// Finite values only, in sample order.
    pub fn finite_values(&self) -> Vec<f64> {
        self.samples
            .iter()
            .map(|s| s.value)
            .filter(|v| v.is_finite())
            .collect()
    }

    /// Stable sort by timestamp.
    pub fn sort_by_time(&mut self) {
        self.samples.sort_by_key(|s| s.time);
    }

    /// Wall-clock distance between the first and last sample, in seconds.
    /// Zero for windows with fewer than two samples.
    pub fn span_seconds(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => {
                (last.time - first.time).num_milliseconds() as f64 / 1000.0
            }
            _ => 0.0,
        }
    }
}

// ============================================================================
// Feature Sets
// ============================================================================

/// Engineered features for one cycle, keyed by stable feature name
/// (`pH_mean`, `CER`, `cumulative_O2`, ...). Ordered so logs, line-protocol
/// writes and API responses are deterministic.
pub type FeatureSet = BTreeMap<String, f64>;

// ============================================================================
// Window Completeness
// ============================================================================

/// Result of checking a window against the expected 1 Hz sample count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowCompleteness {
    pub expected_count: usize,
    pub actual_count: usize,
    pub completeness_percent: f64,
    pub is_complete: bool,
    pub missing_samples: i64,
}

/// Validate that a window holds the expected number of samples.
///
/// `expected = floor(duration / sample_period)`; a window is complete when it
/// holds at least 90 % of that.
pub fn validate_window_completeness(
    actual_count: usize,
    duration_seconds: u64,
    sample_period_seconds: u64,
) -> WindowCompleteness {
    let expected_count = (duration_seconds / sample_period_seconds.max(1)) as usize;
    let completeness_percent = if expected_count == 0 {
        100.0
    } else {
        (actual_count as f64 / expected_count as f64) * 100.0
    };

    WindowCompleteness {
        expected_count,
        actual_count,
        completeness_percent,
        is_complete: completeness_percent >= 90.0,
        missing_samples: expected_count as i64 - actual_count as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completeness_full_window() {
        let result = validate_window_completeness(30, 30, 1);
        assert_eq!(result.expected_count, 30);
        assert_eq!(result.completeness_percent, 100.0);
        assert!(result.is_complete);
        assert_eq!(result.missing_samples, 0);
    }

    #[test]
    fn test_completeness_partial_window() {
        let result = validate_window_completeness(20, 30, 1);
        assert!((result.completeness_percent - 66.67).abs() < 0.1);
        assert!(!result.is_complete);
        assert_eq!(result.missing_samples, 10);
    }

    #[test]
    fn test_completeness_boundary_at_90_percent() {
        // 27/30 = exactly 90 % -> complete
        assert!(validate_window_completeness(27, 30, 1).is_complete);
        assert!(!validate_window_completeness(26, 30, 1).is_complete);
    }

    #[test]
    fn test_window_span_and_sort() {
        let start = Utc::now();
        let mut window = Window::new(vec![
            Sample::new(start + chrono::Duration::seconds(5), 2.0),
            Sample::new(start, 1.0),
        ]);
        window.sort_by_time();
        assert_eq!(window.values(), vec![1.0, 2.0]);
        assert!((window.span_seconds() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_finite_values_skips_gaps() {
        let window = Window::from_values(Utc::now(), &[1.0, f64::NAN, 3.0]);
        assert_eq!(window.len(), 3);
        assert_eq!(window.finite_values(), vec![1.0, 3.0]);
    }
}
