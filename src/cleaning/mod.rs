//! Data Cleaning and Validation
//!
//! Per-sensor quality repair for 30-second windows, in strict stage order:
//!
//! 1. Missing-value handling — gap-duration driven mode selection between
//!    linear interpolation, the state-space smoother, and giving up with a
//!    `missing_data_too_long` alarm.
//! 2. Outlier detection and clipping (z-score over the finite values).
//! 3. Physical-bounds enforcement — out-of-interval readings become NaN and
//!    raise a `physical_bounds_violation` alarm.
//!
//! Values that survive cleaning are either finite and inside the tag's
//! physical bounds, or NaN. Out-of-bounds finite values never reach the
//! feature engineer.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::Settings;
use crate::processing::{rts_smooth, stats};
use crate::sensors::SensorTag;
use crate::types::Window;

/// Alarm raised when a gap exceeds the smoother horizon.
pub const ALARM_MISSING_DATA_TOO_LONG: &str = "missing_data_too_long";
/// Alarm raised when readings fall outside the physical-plausibility interval.
pub const ALARM_PHYSICAL_BOUNDS_VIOLATION: &str = "physical_bounds_violation";

// ============================================================================
// Quality Reporting
// ============================================================================

/// Gap-repair strategy chosen for a window, driven by the equivalent gap
/// duration. `Smoother` falls back to forward/backward fill when fewer than
/// two finite anchors exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMode {
    #[default]
    None,
    Linear,
    Smoother,
    Failed,
}

impl std::fmt::Display for InterpolationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpolationMode::None => write!(f, "none"),
            InterpolationMode::Linear => write!(f, "linear"),
            InterpolationMode::Smoother => write!(f, "smoother"),
            InterpolationMode::Failed => write!(f, "failed"),
        }
    }
}

/// Per-tag, per-cycle record of what the cleaner did.
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub tag: SensorTag,
    pub original_count: usize,
    pub missing_count: usize,
    pub missing_duration_minutes: f64,
    pub interpolation_method: InterpolationMode,
    pub outliers_detected: usize,
    pub invalid_values: usize,
    pub alarm: Option<&'static str>,
}

impl QualityReport {
    fn new(tag: SensorTag, original_count: usize) -> Self {
        Self {
            tag,
            original_count,
            missing_count: 0,
            missing_duration_minutes: 0.0,
            interpolation_method: InterpolationMode::None,
            outliers_detected: 0,
            invalid_values: 0,
            alarm: None,
        }
    }
}

/// Process-wide monotone counters, accumulated across cycles until batch
/// reset. Mutated only by the worker (see the orchestrator's locking).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityStats {
    pub missing_count: u64,
    pub outlier_count: u64,
    pub invalid_count: u64,
    pub interpolated_count: u64,
    pub smoother_filtered_count: u64,
}

impl QualityStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Data Cleaner
// ============================================================================

/// Real-time per-window cleaning and validation.
pub struct DataCleaner {
    settings: Arc<Settings>,
    stats: QualityStats,
}

impl DataCleaner {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            stats: QualityStats::default(),
        }
    }

    /// Clean one window of sensor data.
    ///
    /// Sorts on ingress (the gateway does not guarantee time order), then
    /// runs the three repair stages and updates the cumulative stats.
    pub fn clean(&mut self, window: Window, tag: SensorTag) -> (Window, QualityReport) {
        if window.is_empty() {
            warn!(sensor = %tag, "Empty window");
            return (window, QualityReport::new(tag, 0));
        }

        let mut window = window;
        window.sort_by_time();

        let mut report = QualityReport::new(tag, window.len());

        self.handle_missing(&mut window, tag, &mut report);
        self.handle_outliers(&mut window, tag, &mut report);
        self.validate_bounds(&mut window, tag, &mut report);

        self.stats.missing_count += report.missing_count as u64;
        self.stats.outlier_count += report.outliers_detected as u64;
        self.stats.invalid_count += report.invalid_values as u64;

        (window, report)
    }

    /// Cumulative quality statistics since the last batch reset.
    pub fn quality_stats(&self) -> QualityStats {
        self.stats.clone()
    }

    /// Reset the cumulative counters (new batch).
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Stage 1: missing-value handling.
    ///
    /// The equivalent gap duration is `(missing / total) × span_minutes`,
    /// with the span measured from the actual first and last timestamps.
    /// Up to 5 minutes the gap is linearly interpolated, up to 30 minutes it
    /// goes through the state-space smoother, beyond that the window is left
    /// as-is with an alarm.
    fn handle_missing(&mut self, window: &mut Window, tag: SensorTag, report: &mut QualityReport) {
        let mut values = window.values();
        let missing = values.iter().filter(|v| !v.is_finite()).count();
        if missing == 0 {
            return;
        }

        report.missing_count = missing;
        let span_minutes = window.span_seconds() / 60.0;
        let gap_minutes = (missing as f64 / values.len() as f64) * span_minutes;
        report.missing_duration_minutes = gap_minutes;

        if gap_minutes <= self.settings.max_missing_duration_interpolate_minutes {
            linear_fill(&mut values);
            report.interpolation_method = InterpolationMode::Linear;
            self.stats.interpolated_count += missing as u64;
            debug!(sensor = %tag, missing, "Applied linear interpolation");
        } else if gap_minutes <= self.settings.max_missing_duration_smoother_minutes {
            match rts_smooth(&values) {
                Some(smoothed) => values = smoothed,
                None => {
                    warn!(sensor = %tag, "Not enough anchors for smoother, using forward fill");
                    forward_backward_fill(&mut values);
                }
            }
            report.interpolation_method = InterpolationMode::Smoother;
            self.stats.smoother_filtered_count += missing as u64;
            warn!(
                sensor = %tag,
                missing,
                gap_minutes,
                "Applied state-space smoother"
            );
        } else {
            report.interpolation_method = InterpolationMode::Failed;
            report.alarm = Some(ALARM_MISSING_DATA_TOO_LONG);
            error!(
                sensor = %tag,
                gap_minutes,
                threshold = self.settings.max_missing_duration_smoother_minutes,
                "Missing data duration exceeds smoother horizon"
            );
        }

        for (sample, value) in window.samples.iter_mut().zip(values) {
            sample.value = value;
        }
    }

    /// Stage 2: z-score outlier detection, clipping the series to ±3σ.
    fn handle_outliers(&mut self, window: &mut Window, tag: SensorTag, report: &mut QualityReport) {
        let finite = window.finite_values();
        if finite.len() < 3 {
            return;
        }

        let (Some(mean), Some(std)) = (stats::mean(&finite), stats::population_std(&finite))
        else {
            return;
        };
        if std == 0.0 {
            return;
        }

        let threshold = self.settings.outlier_zscore_threshold;
        let outliers = finite
            .iter()
            .filter(|v| ((*v - mean) / std).abs() > threshold)
            .count();

        if outliers > 0 {
            report.outliers_detected = outliers;

            let lower = mean - 3.0 * std;
            let upper = mean + 3.0 * std;
            for sample in &mut window.samples {
                if sample.value.is_finite() {
                    sample.value = sample.value.clamp(lower, upper);
                }
            }

            debug!(sensor = %tag, outliers, lower, upper, "Clipped outliers");
        }
    }

    /// Stage 3: physical-bounds enforcement. Out-of-interval finite values
    /// become NaN so the engineer never sees them.
    fn validate_bounds(&mut self, window: &mut Window, tag: SensorTag, report: &mut QualityReport) {
        let Some(bounds) = self.settings.bounds_for(tag) else {
            return;
        };

        let mut invalid = 0usize;
        for sample in &mut window.samples {
            if sample.value.is_finite() && !bounds.contains(sample.value) {
                sample.value = f64::NAN;
                invalid += 1;
            }
        }

        if invalid > 0 {
            report.invalid_values = invalid;
            report.alarm = Some(ALARM_PHYSICAL_BOUNDS_VIOLATION);
            error!(
                sensor = %tag,
                invalid,
                min = bounds.min,
                max = bounds.max,
                "Values outside physical bounds set to NaN"
            );
        }
    }
}

// ============================================================================
// Fill Strategies
// ============================================================================

/// Linear interpolation over sample index, filling both directions at the
/// boundaries (leading gaps take the first finite value, trailing gaps the
/// last). A series with no finite anchor is left untouched.
fn linear_fill(values: &mut [f64]) {
    let finite_idx: Vec<usize> = values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, _)| i)
        .collect();

    let (Some(&first), Some(&last)) = (finite_idx.first(), finite_idx.last()) else {
        return;
    };

    for i in 0..first {
        values[i] = values[first];
    }
    for i in last + 1..values.len() {
        values[i] = values[last];
    }

    for pair in finite_idx.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b > a + 1 {
            let (va, vb) = (values[a], values[b]);
            for i in a + 1..b {
                let t = (i - a) as f64 / (b - a) as f64;
                values[i] = va + (vb - va) * t;
            }
        }
    }
}

/// Forward fill, then backward fill for any leading gap. Smoother fallback
/// when fewer than two anchors exist.
fn forward_backward_fill(values: &mut [f64]) {
    let mut carry = f64::NAN;
    for v in values.iter_mut() {
        if v.is_finite() {
            carry = *v;
        } else if carry.is_finite() {
            *v = carry;
        }
    }

    let mut carry = f64::NAN;
    for v in values.iter_mut().rev() {
        if v.is_finite() {
            carry = *v;
        } else if carry.is_finite() {
            *v = carry;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn cleaner() -> DataCleaner {
        DataCleaner::new(Arc::new(Settings::default()))
    }

    fn window_1hz(values: &[f64]) -> Window {
        Window::from_values(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(), values)
    }

    /// Window with a configurable sample spacing, for gap-duration tests.
    fn window_spaced(values: &[f64], spacing_seconds: i64) -> Window {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        Window::new(
            values
                .iter()
                .enumerate()
                .map(|(i, &v)| {
                    crate::types::Sample::new(
                        start + Duration::seconds(i as i64 * spacing_seconds),
                        v,
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn test_clean_empty_window() {
        let (cleaned, report) = cleaner().clean(Window::default(), SensorTag::Ph);
        assert!(cleaned.is_empty());
        assert_eq!(report.original_count, 0);
        assert_eq!(report.interpolation_method, InterpolationMode::None);
    }

    #[test]
    fn test_clean_valid_data_is_untouched() {
        let values: Vec<f64> = (0..30)
            .map(|i| if i % 2 == 0 { 6.98 } else { 7.02 })
            .collect();
        let (cleaned, report) = cleaner().clean(window_1hz(&values), SensorTag::Ph);

        assert_eq!(cleaned.len(), 30);
        assert_eq!(report.missing_count, 0);
        assert_eq!(report.outliers_detected, 0);
        assert_eq!(report.invalid_values, 0);
        assert!(report.alarm.is_none());
        assert_eq!(cleaned.values(), values);
    }

    #[test]
    fn test_short_gap_selects_linear() {
        let mut values = vec![7.0; 30];
        for v in values.iter_mut().take(13).skip(10) {
            *v = f64::NAN;
        }
        let (cleaned, report) = cleaner().clean(window_1hz(&values), SensorTag::Ph);

        assert_eq!(report.missing_count, 3);
        assert_eq!(report.interpolation_method, InterpolationMode::Linear);
        assert!(cleaned.values().iter().all(|v| v.is_finite()));
        let mean = stats::mean(&cleaned.finite_values()).unwrap();
        assert!((mean - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_fill_boundary_gaps() {
        let mut values = vec![f64::NAN, f64::NAN, 5.0, f64::NAN, 7.0, f64::NAN];
        linear_fill(&mut values);
        assert_eq!(values, vec![5.0, 5.0, 5.0, 6.0, 7.0, 7.0]);
    }

    #[test]
    fn test_medium_gap_selects_smoother() {
        // 60 samples a minute apart: span 59 min; 10 missing -> ~9.8 min gap
        let mut values = vec![7.0; 60];
        for v in values.iter_mut().take(35).skip(25) {
            *v = f64::NAN;
        }
        let (cleaned, report) = cleaner().clean(window_spaced(&values, 60), SensorTag::Ph);

        assert_eq!(report.interpolation_method, InterpolationMode::Smoother);
        assert!(cleaned.values().iter().all(|v| v.is_finite()));
        for v in cleaned.values() {
            assert!((v - 7.0).abs() < 0.5);
        }
    }

    #[test]
    fn test_long_gap_fails_with_alarm() {
        // 60 samples a minute apart; 40 missing -> ~38.7 min gap
        let mut values = vec![7.0; 60];
        for v in values.iter_mut().take(50).skip(10) {
            *v = f64::NAN;
        }
        let (cleaned, report) = cleaner().clean(window_spaced(&values, 60), SensorTag::Ph);

        assert_eq!(report.interpolation_method, InterpolationMode::Failed);
        assert_eq!(report.alarm, Some(ALARM_MISSING_DATA_TOO_LONG));
        // NaN left in place
        assert_eq!(cleaned.values().iter().filter(|v| !v.is_finite()).count(), 40);
    }

    #[test]
    fn test_gap_boundary_selection() {
        // 30 samples spanning exactly 10 minutes, 15 missing -> gap = 5.0 min
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let make = |missing: usize| {
            let mut samples = Vec::new();
            for i in 0..30i64 {
                let t = start + Duration::milliseconds(i * 600_000 / 29);
                let v = if (i as usize) < missing { f64::NAN } else { 7.0 };
                samples.push(crate::types::Sample::new(t, v));
            }
            Window::new(samples)
        };

        // gap = 15/30 * 10 = 5.0 min -> linear (inclusive boundary)
        let (_, report) = cleaner().clean(make(15), SensorTag::Ph);
        assert_eq!(report.interpolation_method, InterpolationMode::Linear);

        // gap = 16/30 * 10 ≈ 5.33 min -> smoother
        let (_, report) = cleaner().clean(make(16), SensorTag::Ph);
        assert_eq!(report.interpolation_method, InterpolationMode::Smoother);
    }

    #[test]
    fn test_smoother_falls_back_to_fill_with_one_anchor() {
        // One finite anchor, gap in smoother range
        let mut values = vec![f64::NAN; 60];
        values[0] = 7.0;
        let (cleaned, report) = cleaner().clean(window_spaced(&values, 30), SensorTag::Ph);

        assert_eq!(report.interpolation_method, InterpolationMode::Smoother);
        assert!(cleaned.values().iter().all(|v| (v - 7.0).abs() < 1e-9));
    }

    #[test]
    fn test_all_nan_window_reports_every_sample_missing() {
        let values = vec![f64::NAN; 30];
        let (cleaned, report) = cleaner().clean(window_1hz(&values), SensorTag::Ph);

        assert_eq!(report.missing_count, 30);
        // Nothing to anchor on: the window stays NaN
        assert!(cleaned.values().iter().all(|v| !v.is_finite()));
    }

    #[test]
    fn test_outlier_detection_and_clipping() {
        let mut values = vec![50.0; 29];
        values.push(500.0);
        let (cleaned, report) = cleaner().clean(window_1hz(&values), SensorTag::Do);

        assert_eq!(report.outliers_detected, 1);
        let max = cleaned
            .finite_values()
            .into_iter()
            .fold(f64::MIN, f64::max);
        assert!(max < 500.0);
    }

    #[test]
    fn test_zero_variance_yields_no_outliers() {
        let values = vec![7.0; 30];
        let (_, report) = cleaner().clean(window_1hz(&values), SensorTag::Ph);
        assert_eq!(report.outliers_detected, 0);
    }

    #[test]
    fn test_physical_bounds_violation() {
        let mut values = vec![7.0; 25];
        values.extend([1.0, 0.5, -1.0, 11.0, 12.0]);
        let (cleaned, report) = cleaner().clean(window_1hz(&values), SensorTag::Ph);

        assert!(report.invalid_values > 0);
        assert_eq!(report.alarm, Some(ALARM_PHYSICAL_BOUNDS_VIOLATION));
        // Every invalid value was replaced with NaN
        let nan_count = cleaned.values().iter().filter(|v| !v.is_finite()).count();
        assert_eq!(nan_count, report.invalid_values);
        // Survivors are in bounds
        for v in cleaned.finite_values() {
            assert!((2.0..=10.0).contains(&v));
        }
    }

    #[test]
    fn test_quality_stats_accumulate_and_reset() {
        let mut cleaner = cleaner();

        // Interior gap surrounded by 7.0: interpolates flat, no outliers
        let mut gap_values = vec![7.0; 10];
        gap_values.extend([f64::NAN; 3]);
        gap_values.extend(vec![7.0; 17]);
        for _ in 0..3 {
            cleaner.clean(window_1hz(&gap_values), SensorTag::Ph);
        }

        // 1.5 is below the pH bound but within 3 sigma of this series
        let mut invalid_values = vec![7.0; 25];
        invalid_values.extend([1.5; 5]);
        for _ in 0..2 {
            cleaner.clean(window_1hz(&invalid_values), SensorTag::Ph);
        }

        let stats = cleaner.quality_stats();
        assert_eq!(stats.missing_count, 9);
        assert_eq!(stats.interpolated_count, 9);
        assert_eq!(stats.outlier_count, 0);
        assert_eq!(stats.invalid_count, 10);
        assert_eq!(stats.smoother_filtered_count, 0);

        cleaner.reset_stats();
        assert_eq!(cleaner.quality_stats(), QualityStats::default());
    }

    #[test]
    fn test_unsorted_window_is_sorted_on_ingress() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let window = Window::new(vec![
            crate::types::Sample::new(start + Duration::seconds(2), 3.0),
            crate::types::Sample::new(start, 1.0),
            crate::types::Sample::new(start + Duration::seconds(1), 2.0),
        ]);
        let (cleaned, _) = cleaner().clean(window, SensorTag::StirTorque);
        assert_eq!(cleaned.values(), vec![1.0, 2.0, 3.0]);
    }
}
