//! Pipeline Orchestrator
//!
//! Drives one processing cycle — fetch → clean → engineer → write →
//! metrics → alerts — and the continuous ticker-driven worker around it.
//! Feature writes for cycle *n* complete before alerts for *n* are emitted
//! and before cycle *n+1* starts.
//!
//! All mutation of the cleaner, the engineer and the cycle counter is
//! serialized through one mutex: worker cycles, one-shot processing and
//! batch reset all take it, so a reset can never race a cycle.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cleaning::{DataCleaner, QualityReport, QualityStats};
use crate::config::Settings;
use crate::features::FeatureEngineer;
use crate::gateway::{GatewayError, TimeSeriesStore};
use crate::monitoring::{evaluate_alerts, MonitoringService};
use crate::sensors::{SensorTag, ALL_SENSOR_TAGS};
use crate::types::{validate_window_completeness, FeatureSet, WindowCompleteness};

/// Pause before resuming the ticker after a failed cycle.
const FAILURE_RETRY_PAUSE: Duration = Duration::from_secs(5);

/// A cycle that could not complete. Reads degrade per-sensor inside the
/// gateway; only the feature write can fail a cycle outright.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("feature write failed: {0}")]
    Write(#[from] GatewayError),
}

// ============================================================================
// Data Pipeline (one cycle)
// ============================================================================

/// Owns the per-batch state and executes single cycles.
pub struct DataPipeline {
    settings: Arc<Settings>,
    store: Arc<dyn TimeSeriesStore>,
    monitoring: Arc<MonitoringService>,
    cleaner: DataCleaner,
    engineer: FeatureEngineer,
    cycle_count: u64,
}

impl DataPipeline {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<dyn TimeSeriesStore>,
        monitoring: Arc<MonitoringService>,
    ) -> Self {
        Self {
            cleaner: DataCleaner::new(settings.clone()),
            engineer: FeatureEngineer::new(settings.clone()),
            settings,
            store,
            monitoring,
            cycle_count: 0,
        }
    }

    /// Process a single window of sensor data.
    pub async fn process_window(&mut self) -> Result<FeatureSet, CycleError> {
        let started = Instant::now();
        let window_duration = Duration::from_secs(self.settings.window_size_seconds);

        // 1. Fetch windows for all sensors; per-tag failures degrade to
        //    empty windows inside the gateway.
        debug!("Fetching sensor windows");
        let raw_windows = self
            .store
            .read_all_windows(&ALL_SENSOR_TAGS, window_duration)
            .await;

        // 2. Completeness check, then clean each window
        debug!("Cleaning sensor data");
        let mut completeness: BTreeMap<SensorTag, WindowCompleteness> = BTreeMap::new();
        let mut cleaned = BTreeMap::new();
        let mut reports: BTreeMap<SensorTag, QualityReport> = BTreeMap::new();

        for (tag, window) in raw_windows {
            completeness.insert(
                tag,
                validate_window_completeness(window.len(), self.settings.window_size_seconds, 1),
            );
            let (cleaned_window, report) = self.cleaner.clean(window, tag);
            cleaned.insert(tag, cleaned_window);
            reports.insert(tag, report);
        }

        log_quality_issues(&reports);

        // 3. Engineer features from the cleaned map
        debug!("Engineering features");
        let features = self.engineer.engineer(&cleaned);

        // 4. Write features; a failed write fails the cycle and nothing is
        //    published for it
        let timestamp = Utc::now();
        self.store.write_features(&features, timestamp).await?;

        // 5. Metrics, then 6. alerts — after the write is durable
        self.monitoring
            .record_cycle(&reports, &completeness, &features, started.elapsed())
            .await;
        let alerts = evaluate_alerts(&reports, &features);
        self.monitoring.publish_alerts(&alerts).await;

        info!(
            cycle = self.cycle_count,
            features = features.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Window processed"
        );
        self.cycle_count += 1;

        Ok(features)
    }

    /// Reset per-batch state for a new fermentation batch.
    pub fn reset_batch(&mut self) {
        info!("Resetting pipeline for new batch");
        self.cleaner.reset_stats();
        self.engineer.reset_history();
        self.cycle_count = 0;
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn quality_stats(&self) -> QualityStats {
        self.cleaner.quality_stats()
    }
}

/// Log the quality issues that operators care about per cycle.
fn log_quality_issues(reports: &BTreeMap<SensorTag, QualityReport>) {
    for (tag, report) in reports {
        if let Some(alarm) = report.alarm {
            warn!(sensor = %tag, alarm, "Data quality alarm");
        }
        if report.missing_count > 15 {
            warn!(
                sensor = %tag,
                missing = report.missing_count,
                total = report.original_count,
                "High missing data"
            );
        }
        if report.invalid_values > 0 {
            error!(
                sensor = %tag,
                invalid = report.invalid_values,
                "Physical bounds violation"
            );
        }
    }
}

// ============================================================================
// Pipeline Handle (continuous worker)
// ============================================================================

/// Shared handle over the pipeline: the control surface starts/stops the
/// worker and triggers one-shot cycles through it.
pub struct PipelineHandle {
    inner: Mutex<DataPipeline>,
    settings: Arc<Settings>,
    store: Arc<dyn TimeSeriesStore>,
    monitoring: Arc<MonitoringService>,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    started_at: Instant,
}

impl PipelineHandle {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<dyn TimeSeriesStore>,
        monitoring: Arc<MonitoringService>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(DataPipeline::new(
                settings.clone(),
                store.clone(),
                monitoring.clone(),
            )),
            settings,
            store,
            monitoring,
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
            started_at: Instant::now(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn cycle_count(&self) -> u64 {
        self.inner.lock().await.cycle_count()
    }

    pub async fn quality_stats(&self) -> QualityStats {
        self.inner.lock().await.quality_stats()
    }

    /// One-shot cycle, allowed in any state. Serialized with the worker.
    pub async fn process_once(&self) -> Result<FeatureSet, CycleError> {
        let result = self.inner.lock().await.process_window().await;
        if let Err(e) = &result {
            error!(error = %e, "Window processing failed");
            self.monitoring.record_error("cycle_failed").await;
        }
        result
    }

    /// Reset batch state. Takes the cycle mutex, so it cannot interleave
    /// with a running cycle.
    pub async fn reset_batch(&self) {
        self.inner.lock().await.reset_batch();
    }

    /// Launch the continuous worker. Returns false when already running.
    pub async fn start(self: Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let token = CancellationToken::new();
        *self.cancel.lock().await = Some(token.clone());

        tokio::spawn(async move {
            self.run_continuous(token).await;
        });
        true
    }

    /// Request cooperative cancellation. Returns false when no worker was
    /// running. In-flight I/O finishes; the worker observes the signal at
    /// the next cycle boundary or sleep.
    pub async fn stop(&self) -> bool {
        match self.cancel.lock().await.take() {
            Some(token) => {
                info!("Stopping pipeline");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Ticker-driven worker loop. The ticker (rather than post-cycle sleep)
    /// keeps cycle-to-cycle jitter bounded under variable cycle cost.
    async fn run_continuous(self: Arc<Self>, token: CancellationToken) {
        info!(
            interval_seconds = self.settings.processing_interval_seconds,
            "Starting continuous pipeline"
        );
        self.monitoring.set_running(true).await;

        let mut ticker = tokio::time::interval(Duration::from_secs(
            self.settings.processing_interval_seconds,
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.process_once().await {
                        error!(error = %e, "Pipeline cycle failed, pausing before retry");
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(FAILURE_RETRY_PAUSE) => {}
                        }
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.monitoring.set_running(false).await;
        self.cancel.lock().await.take();
        self.store.close().await;

        let pipeline = self.inner.lock().await;
        let stats = pipeline.quality_stats();
        info!(
            cycles = pipeline.cycle_count(),
            missing = stats.missing_count,
            outliers = stats.outlier_count,
            invalid = stats.invalid_count,
            "Pipeline stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Window;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Mutex as StdMutex;

    /// In-memory store: fixed raw windows, recorded writes, optional write
    /// failure injection.
    struct MemoryStore {
        windows: BTreeMap<SensorTag, Window>,
        writes: StdMutex<Vec<(FeatureSet, DateTime<Utc>)>>,
        fail_writes: bool,
    }

    impl MemoryStore {
        fn new(windows: BTreeMap<SensorTag, Window>) -> Self {
            Self {
                windows,
                writes: StdMutex::new(Vec::new()),
                fail_writes: false,
            }
        }

        fn write_count(&self) -> usize {
            self.writes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TimeSeriesStore for MemoryStore {
        async fn read_window(
            &self,
            tag: SensorTag,
            _duration: Duration,
        ) -> Result<Window, GatewayError> {
            Ok(self.windows.get(&tag).cloned().unwrap_or_default())
        }

        async fn write_features(
            &self,
            features: &FeatureSet,
            timestamp: DateTime<Utc>,
        ) -> Result<(), GatewayError> {
            if self.fail_writes {
                return Err(GatewayError::Server {
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                    body: "injected".to_string(),
                });
            }
            self.writes.lock().unwrap().push((features.clone(), timestamp));
            Ok(())
        }

        async fn write_prediction(
            &self,
            _prediction: f64,
            _confidence_lower: f64,
            _confidence_upper: f64,
            _timestamp: DateTime<Utc>,
        ) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    fn test_windows() -> BTreeMap<SensorTag, Window> {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut windows = BTreeMap::new();
        windows.insert(SensorTag::Ph, Window::from_values(start, &[7.0; 30]));
        windows.insert(SensorTag::Do, Window::from_values(start, &[60.0; 30]));
        windows.insert(SensorTag::Od, Window::from_values(start, &[2.0; 30]));
        windows
    }

    fn handle_with(store: Arc<MemoryStore>) -> Arc<PipelineHandle> {
        let settings = Arc::new(Settings {
            processing_interval_seconds: 1,
            ..Settings::default()
        });
        let monitoring = Arc::new(MonitoringService::new(settings.clone()));
        PipelineHandle::new(settings, store, monitoring)
    }

    #[tokio::test]
    async fn test_process_once_writes_features() {
        let store = Arc::new(MemoryStore::new(test_windows()));
        let handle = handle_with(store.clone());

        let features = handle.process_once().await.unwrap();
        assert!(features.contains_key("pH_mean"));
        assert!(features.values().all(|v| v.is_finite()));

        assert_eq!(store.write_count(), 1);
        assert_eq!(handle.cycle_count().await, 1);
    }

    #[tokio::test]
    async fn test_write_failure_fails_cycle() {
        let mut store = MemoryStore::new(test_windows());
        store.fail_writes = true;
        let handle = handle_with(Arc::new(store));

        assert!(handle.process_once().await.is_err());
        assert_eq!(handle.cycle_count().await, 0);
    }

    #[tokio::test]
    async fn test_reset_batch_zeroes_state() {
        let store = Arc::new(MemoryStore::new(test_windows()));
        let handle = handle_with(store);

        handle.process_once().await.unwrap();
        handle.process_once().await.unwrap();
        assert_eq!(handle.cycle_count().await, 2);

        handle.reset_batch().await;
        assert_eq!(handle.cycle_count().await, 0);
        assert_eq!(handle.quality_stats().await, QualityStats::default());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let store = Arc::new(MemoryStore::new(test_windows()));
        let handle = handle_with(store);

        assert!(handle.clone().start().await);
        assert!(!handle.clone().start().await, "second start must be a no-op");
        assert!(handle.is_running());

        assert!(handle.stop().await);
        assert!(!handle.stop().await, "second stop must be a no-op");
    }

    #[tokio::test]
    async fn test_worker_processes_and_stops() {
        let store = Arc::new(MemoryStore::new(test_windows()));
        let handle = handle_with(store.clone());

        assert!(handle.clone().start().await);
        // First tick fires immediately; give the worker a moment
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.write_count() >= 1);

        handle.stop().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_running());
    }
}
