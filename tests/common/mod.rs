//! Shared fixtures: an in-memory store implementing the gateway trait.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bioprocess_pipeline::config::Settings;
use bioprocess_pipeline::gateway::{GatewayError, TimeSeriesStore};
use bioprocess_pipeline::monitoring::MonitoringService;
use bioprocess_pipeline::pipeline::PipelineHandle;
use bioprocess_pipeline::sensors::SensorTag;
use bioprocess_pipeline::types::{FeatureSet, Window};

/// In-memory time-series store. Serves fixed windows and records feature
/// writes so tests can read cycle output back.
#[derive(Default)]
pub struct MemoryStore {
    windows: Mutex<BTreeMap<SensorTag, Window>>,
    writes: Mutex<Vec<(FeatureSet, DateTime<Utc>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_windows(&self, windows: BTreeMap<SensorTag, Window>) {
        *self.windows.lock().unwrap() = windows;
    }

    /// All feature sets written so far, oldest first.
    pub fn written(&self) -> Vec<(FeatureSet, DateTime<Utc>)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn last_written(&self) -> Option<FeatureSet> {
        self.writes.lock().unwrap().last().map(|(f, _)| f.clone())
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryStore {
    async fn read_window(
        &self,
        tag: SensorTag,
        _duration: Duration,
    ) -> Result<Window, GatewayError> {
        Ok(self
            .windows
            .lock()
            .unwrap()
            .get(&tag)
            .cloned()
            .unwrap_or_default())
    }

    async fn write_features(
        &self,
        features: &FeatureSet,
        timestamp: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
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

/// Start-of-window timestamp used by all fixtures.
fn window_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

pub fn window_of(values: &[f64]) -> Window {
    Window::from_values(window_start(), values)
}

pub fn constant_window(value: f64, len: usize) -> Window {
    window_of(&vec![value; len])
}

/// A healthy mid-batch set of sensor windows.
pub fn healthy_windows() -> BTreeMap<SensorTag, Window> {
    let ph: Vec<f64> = (0..30)
        .map(|i| 7.0 + if i % 2 == 0 { 0.02 } else { -0.02 })
        .collect();
    [
        (SensorTag::Ph, window_of(&ph)),
        (SensorTag::Do, constant_window(60.0, 30)),
        (SensorTag::Od, constant_window(2.0, 30)),
        (SensorTag::TempBroth, constant_window(30.0, 30)),
        (SensorTag::TempExhaust, constant_window(28.0, 30)),
        (SensorTag::TempPhProbe, constant_window(30.1, 30)),
        (SensorTag::TempDoProbe, constant_window(29.9, 30)),
        (SensorTag::TempStirrerMotor, constant_window(45.0, 30)),
        (SensorTag::ReactorPressure, constant_window(1.02, 30)),
        (SensorTag::OffGasCo2, constant_window(2.0, 30)),
        (SensorTag::OffGasO2, constant_window(20.0, 30)),
        (SensorTag::GasFlowInlet, constant_window(1.0, 30)),
        (SensorTag::GasFlowOutlet, constant_window(1.0, 30)),
        (SensorTag::StirSp, constant_window(600.0, 30)),
        (SensorTag::Weight, constant_window(1.1, 30)),
    ]
    .into_iter()
    .collect()
}

/// Pipeline handle over a memory store, one-second interval for tests.
pub fn test_pipeline(store: Arc<MemoryStore>) -> Arc<PipelineHandle> {
    let settings = Arc::new(Settings {
        processing_interval_seconds: 1,
        ..Settings::default()
    });
    let monitoring = Arc::new(MonitoringService::new(settings.clone()));
    PipelineHandle::new(settings, store, monitoring)
}

/// Pipeline handle plus its monitoring service, for metric assertions.
pub fn test_pipeline_with_monitoring(
    store: Arc<MemoryStore>,
) -> (Arc<PipelineHandle>, Arc<MonitoringService>) {
    let settings = Arc::new(Settings {
        processing_interval_seconds: 1,
        ..Settings::default()
    });
    let monitoring = Arc::new(MonitoringService::new(settings.clone()));
    let pipeline = PipelineHandle::new(settings, store, monitoring.clone());
    (pipeline, monitoring)
}
