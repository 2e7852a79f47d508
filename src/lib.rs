//! Bioprocess Edge Data Pipeline
//!
//! Real-time windowed ETL for a fermentation vessel: raw 1 Hz sensor
//! readings are pulled from the time-series store in fixed-duration windows,
//! repaired per sensor, turned into biochemical features and written back,
//! with health telemetry, threshold alerts and a small HTTP control surface.
//!
//! ## Architecture
//!
//! - **Gateway**: windowed reads and feature writes against the TSDB
//! - **Cleaner**: gap repair, outlier clipping, physical-bounds enforcement
//! - **Engineer**: gas balance, growth rate, mass transfer, thermal and
//!   pressure diagnostics, cumulative batch integrals
//! - **Orchestrator**: ticker-driven cycle worker with cooperative shutdown
//! - **Monitoring**: counters, gauges, duration histogram, MQTT alerts
//! - **API**: status, start/stop, one-shot processing, reset, metrics

pub mod api;
pub mod cleaning;
pub mod config;
pub mod features;
pub mod gateway;
pub mod monitoring;
pub mod pipeline;
pub mod processing;
pub mod sensors;
pub mod types;

// Re-export the configuration entry point
pub use config::Settings;

// Re-export commonly used types
pub use cleaning::{DataCleaner, InterpolationMode, QualityReport, QualityStats};
pub use features::{CumulativeHistory, FeatureEngineer};
pub use gateway::{GatewayError, InfluxGateway, TimeSeriesStore};
pub use monitoring::{Alert, AlertCategory, AlertLevel, MonitoringService};
pub use pipeline::{CycleError, DataPipeline, PipelineHandle};
pub use sensors::{SensorTag, ALL_SENSOR_TAGS};
pub use types::{FeatureSet, Sample, Window, WindowCompleteness};
