//! Monitoring and Alerting
//!
//! Aggregates per-cycle counters, gauges and a duration histogram; evaluates
//! the quality and feature thresholds; publishes triggered alerts to the
//! broker. Metrics are written by the worker and read by the control
//! surface's scrape endpoint, rendered in Prometheus text format the same
//! way the counters are maintained — by hand, no metrics crate.

pub mod alerts;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::cleaning::QualityReport;
use crate::config::Settings;
use crate::sensors::SensorTag;
use crate::types::{FeatureSet, WindowCompleteness};

pub use alerts::{Alert, AlertCategory, AlertLevel, AlertPublisher};

/// Missing samples per window above which a warning alert fires.
const MISSING_ALERT_THRESHOLD: usize = 15;
/// Growth rate above this is unrealistically high for Pichia, h⁻¹.
const MU_UNREALISTIC_THRESHOLD: f64 = 0.5;
/// Normal respiratory quotient band for aerobic growth on glycerol.
const RQ_NORMAL_RANGE: (f64, f64) = (0.5, 1.5);
/// Stirrer motor temperature that triggers an equipment alert, °C.
const MOTOR_TEMP_ALERT_C: f64 = 70.0;

// ============================================================================
// Duration Histogram
// ============================================================================

/// Fixed-bucket histogram of cycle processing time in seconds.
#[derive(Debug, Clone)]
pub struct DurationHistogram {
    bounds: &'static [f64],
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Default for DurationHistogram {
    fn default() -> Self {
        const BOUNDS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
        Self {
            bounds: BOUNDS,
            counts: vec![0; BOUNDS.len()],
            sum: 0.0,
            count: 0,
        }
    }
}

impl DurationHistogram {
    pub fn observe(&mut self, seconds: f64) {
        for (i, bound) in self.bounds.iter().enumerate() {
            if seconds <= *bound {
                self.counts[i] += 1;
            }
        }
        self.sum += seconds;
        self.count += 1;
    }

    fn render(&self, name: &str, out: &mut String) {
        for (i, bound) in self.bounds.iter().enumerate() {
            out.push_str(&format!("{name}_bucket{{le=\"{bound}\"}} {}\n", self.counts[i]));
        }
        out.push_str(&format!("{name}_bucket{{le=\"+Inf\"}} {}\n", self.count));
        out.push_str(&format!("{name}_sum {}\n", self.sum));
        out.push_str(&format!("{name}_count {}\n", self.count));
    }
}

// ============================================================================
// Metrics Registry
// ============================================================================

/// Counters and gauges maintained by the worker.
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub windows_processed: u64,
    pub features_generated: u64,
    pub missing_data: BTreeMap<SensorTag, u64>,
    pub outliers_detected: BTreeMap<SensorTag, u64>,
    pub bounds_violations: BTreeMap<SensorTag, u64>,
    pub processing_errors: BTreeMap<String, u64>,
    pub running: bool,
    pub window_completeness: BTreeMap<SensorTag, f64>,
    pub feature_values: BTreeMap<String, f64>,
    pub quality_scores: BTreeMap<SensorTag, f64>,
    pub processing_duration: DurationHistogram,
}

// ============================================================================
// Monitoring Service
// ============================================================================

/// Pipeline health aggregation and alert dispatch.
pub struct MonitoringService {
    settings: Arc<Settings>,
    metrics: RwLock<PipelineMetrics>,
    publisher: Option<AlertPublisher>,
}

impl MonitoringService {
    /// Build the service without a broker connection (alerts are logged).
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            metrics: RwLock::new(PipelineMetrics::default()),
            publisher: None,
        }
    }

    /// Try to attach the MQTT alert channel. On failure the service keeps
    /// running with alerting disabled.
    pub async fn connect_broker(&mut self) {
        self.publisher = AlertPublisher::connect(&self.settings).await;
    }

    pub fn alerts_enabled(&self) -> bool {
        self.publisher.is_some()
    }

    /// Record the outcome of one processing cycle.
    pub async fn record_cycle(
        &self,
        reports: &BTreeMap<SensorTag, QualityReport>,
        completeness: &BTreeMap<SensorTag, WindowCompleteness>,
        features: &FeatureSet,
        duration: Duration,
    ) {
        let mut metrics = self.metrics.write().await;

        metrics.windows_processed += 1;
        metrics.features_generated += features.len() as u64;

        for (tag, report) in reports {
            if report.missing_count > 0 {
                *metrics.missing_data.entry(*tag).or_default() += report.missing_count as u64;
            }
            if report.outliers_detected > 0 {
                *metrics.outliers_detected.entry(*tag).or_default() +=
                    report.outliers_detected as u64;
            }
            if report.invalid_values > 0 {
                *metrics.bounds_violations.entry(*tag).or_default() +=
                    report.invalid_values as u64;
            }
            metrics.quality_scores.insert(
                *tag,
                quality_score(
                    report.missing_count,
                    report.outliers_detected,
                    report.invalid_values,
                ),
            );
        }

        for (tag, c) in completeness {
            metrics.window_completeness.insert(*tag, c.completeness_percent);
        }

        for (name, value) in features {
            metrics.feature_values.insert(name.clone(), *value);
        }

        metrics.processing_duration.observe(duration.as_secs_f64());
    }

    /// Count a processing error by kind.
    pub async fn record_error(&self, error_type: &str) {
        let mut metrics = self.metrics.write().await;
        *metrics
            .processing_errors
            .entry(error_type.to_string())
            .or_default() += 1;
    }

    /// Flip the running gauge.
    pub async fn set_running(&self, running: bool) {
        self.metrics.write().await.running = running;
    }

    /// Publish triggered alerts, or log them when the broker is absent.
    pub async fn publish_alerts(&self, alerts: &[Alert]) {
        for alert in alerts {
            match &self.publisher {
                Some(publisher) => publisher.publish(alert).await,
                None => debug!(
                    level = alert.level.as_str(),
                    category = alert.category.as_str(),
                    message = %alert.message,
                    "Alert (broker disabled)"
                ),
            }
        }
    }

    /// Metrics snapshot for handlers and tests.
    pub async fn snapshot(&self) -> PipelineMetrics {
        self.metrics.read().await.clone()
    }

    /// Prometheus text exposition (version 0.0.4).
    pub async fn render_prometheus(&self) -> String {
        let metrics = self.metrics.read().await;
        let mut body = String::with_capacity(4096);

        body.push_str("# HELP pipeline_windows_processed_total Total windows processed\n");
        body.push_str("# TYPE pipeline_windows_processed_total counter\n");
        body.push_str(&format!(
            "pipeline_windows_processed_total {}\n",
            metrics.windows_processed
        ));

        body.push_str("# HELP pipeline_features_generated_total Total features generated\n");
        body.push_str("# TYPE pipeline_features_generated_total counter\n");
        body.push_str(&format!(
            "pipeline_features_generated_total {}\n",
            metrics.features_generated
        ));

        body.push_str("# HELP pipeline_missing_data_total Missing data points per sensor\n");
        body.push_str("# TYPE pipeline_missing_data_total counter\n");
        for (tag, count) in &metrics.missing_data {
            body.push_str(&format!(
                "pipeline_missing_data_total{{sensor=\"{tag}\"}} {count}\n"
            ));
        }

        body.push_str("# HELP pipeline_outliers_detected_total Outliers clipped per sensor\n");
        body.push_str("# TYPE pipeline_outliers_detected_total counter\n");
        for (tag, count) in &metrics.outliers_detected {
            body.push_str(&format!(
                "pipeline_outliers_detected_total{{sensor=\"{tag}\"}} {count}\n"
            ));
        }

        body.push_str("# HELP pipeline_bounds_violations_total Physical bounds violations per sensor\n");
        body.push_str("# TYPE pipeline_bounds_violations_total counter\n");
        for (tag, count) in &metrics.bounds_violations {
            body.push_str(&format!(
                "pipeline_bounds_violations_total{{sensor=\"{tag}\"}} {count}\n"
            ));
        }

        body.push_str("# HELP pipeline_processing_errors_total Processing errors by kind\n");
        body.push_str("# TYPE pipeline_processing_errors_total counter\n");
        for (kind, count) in &metrics.processing_errors {
            body.push_str(&format!(
                "pipeline_processing_errors_total{{error_type=\"{kind}\"}} {count}\n"
            ));
        }

        body.push_str("# HELP pipeline_running Pipeline running status (1=running, 0=stopped)\n");
        body.push_str("# TYPE pipeline_running gauge\n");
        body.push_str(&format!(
            "pipeline_running {}\n",
            if metrics.running { 1 } else { 0 }
        ));

        body.push_str("# HELP pipeline_window_completeness_percent Window completeness per sensor\n");
        body.push_str("# TYPE pipeline_window_completeness_percent gauge\n");
        for (tag, value) in &metrics.window_completeness {
            body.push_str(&format!(
                "pipeline_window_completeness_percent{{sensor=\"{tag}\"}} {value}\n"
            ));
        }

        body.push_str("# HELP pipeline_data_quality_score Per-sensor data quality score (0-100)\n");
        body.push_str("# TYPE pipeline_data_quality_score gauge\n");
        for (tag, value) in &metrics.quality_scores {
            body.push_str(&format!(
                "pipeline_data_quality_score{{sensor=\"{tag}\"}} {value}\n"
            ));
        }

        body.push_str("# HELP pipeline_feature_value Current feature values\n");
        body.push_str("# TYPE pipeline_feature_value gauge\n");
        for (name, value) in &metrics.feature_values {
            body.push_str(&format!(
                "pipeline_feature_value{{feature_name=\"{name}\"}} {value}\n"
            ));
        }

        body.push_str("# HELP pipeline_processing_duration_seconds Time to process one window\n");
        body.push_str("# TYPE pipeline_processing_duration_seconds histogram\n");
        metrics
            .processing_duration
            .render("pipeline_processing_duration_seconds", &mut body);

        body
    }
}

// ============================================================================
// Threshold Evaluation
// ============================================================================

/// Per-sensor data quality score:
/// `max(0, 100 − 2·missing − 1·outliers − 5·invalids)`.
pub fn quality_score(missing: usize, outliers: usize, invalids: usize) -> f64 {
    let score = 100.0 - 2.0 * missing as f64 - outliers as f64 - 5.0 * invalids as f64;
    score.max(0.0)
}

/// Evaluate all alert conditions for one cycle. Pure; publication is the
/// caller's concern. One alert per triggered condition per cycle, repeats
/// are not suppressed.
pub fn evaluate_alerts(
    reports: &BTreeMap<SensorTag, QualityReport>,
    features: &FeatureSet,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    for (tag, report) in reports {
        if let Some(alarm) = report.alarm {
            alerts.push(Alert::new(
                AlertLevel::Error,
                AlertCategory::DataQuality,
                format!("Data quality alarm for {tag}: {alarm}"),
                serde_json::to_value(report).unwrap_or_default(),
            ));
        }

        if report.missing_count > MISSING_ALERT_THRESHOLD {
            alerts.push(Alert::new(
                AlertLevel::Warning,
                AlertCategory::MissingData,
                format!(
                    "High missing data rate for {tag}: {}/{} samples",
                    report.missing_count, report.original_count
                ),
                serde_json::json!({"tag": tag, "missing_count": report.missing_count}),
            ));
        }

        if report.invalid_values > 0 {
            alerts.push(Alert::new(
                AlertLevel::Critical,
                AlertCategory::SensorFailure,
                format!(
                    "Physical bounds violation for {tag}: {} invalid values",
                    report.invalid_values
                ),
                serde_json::json!({"tag": tag, "invalid_count": report.invalid_values}),
            ));
        }
    }

    if let Some(&mu) = features.get("mu") {
        if mu < 0.0 {
            alerts.push(Alert::new(
                AlertLevel::Warning,
                AlertCategory::ProcessAnomaly,
                format!("Negative growth rate detected: mu={mu:.4} 1/h"),
                serde_json::json!({"mu": mu}),
            ));
        } else if mu > MU_UNREALISTIC_THRESHOLD {
            alerts.push(Alert::new(
                AlertLevel::Warning,
                AlertCategory::ProcessAnomaly,
                format!("Unusually high growth rate: mu={mu:.4} 1/h"),
                serde_json::json!({"mu": mu}),
            ));
        }
    }

    if let Some(&rq) = features.get("RQ") {
        if rq < RQ_NORMAL_RANGE.0 || rq > RQ_NORMAL_RANGE.1 {
            alerts.push(Alert::new(
                AlertLevel::Info,
                AlertCategory::MetabolicShift,
                format!("Respiratory quotient outside normal range: RQ={rq:.3}"),
                serde_json::json!({"RQ": rq}),
            ));
        }
    }

    if let Some(&motor_temp) = features.get("motor_temp") {
        if motor_temp > MOTOR_TEMP_ALERT_C {
            alerts.push(Alert::new(
                AlertLevel::Warning,
                AlertCategory::EquipmentWarning,
                format!("High stirrer motor temperature: {motor_temp:.1} C"),
                serde_json::json!({"motor_temp": motor_temp}),
            ));
        }
    }

    alerts
}
