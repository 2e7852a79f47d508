//! TSDB Gateway
//!
//! Access to the time-series store behind a trait so the orchestrator and the
//! integration tests run against the same seam. The production implementation
//! speaks the InfluxDB v2 HTTP API; tests use an in-memory store.

pub mod influx;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

use crate::sensors::SensorTag;
use crate::types::{FeatureSet, Window};

pub use influx::InfluxGateway;

/// Gateway errors. Absence of data is not an error (an empty window is
/// returned instead); transport and auth failures are.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TSDB returned status {status}: {body}")]
    Server {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Read/write contract against the time-series store.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Read the trailing `duration` of one sensor's raw series.
    /// Returns an empty window when no data exists; surfaces transport
    /// errors. Rows are not guaranteed to be time-ordered.
    async fn read_window(&self, tag: SensorTag, duration: Duration)
        -> Result<Window, GatewayError>;

    /// Fan-out convenience over [`read_window`](Self::read_window).
    /// A failure for one tag degrades to an empty window for that tag only.
    async fn read_all_windows(
        &self,
        tags: &[SensorTag],
        duration: Duration,
    ) -> BTreeMap<SensorTag, Window> {
        let mut windows = BTreeMap::new();
        for &tag in tags {
            let window = match self.read_window(tag, duration).await {
                Ok(w) => w,
                Err(e) => {
                    warn!(sensor = %tag, error = %e, "Window read failed, using empty window");
                    Window::default()
                }
            };
            windows.insert(tag, window);
        }
        windows
    }

    /// Publish one point per finite feature into the features measurement,
    /// tagged by vessel, at the given timestamp.
    async fn write_features(
        &self,
        features: &FeatureSet,
        timestamp: DateTime<Utc>,
    ) -> Result<(), GatewayError>;

    /// Reserved slot for the OD prediction series.
    async fn write_prediction(
        &self,
        prediction: f64,
        confidence_lower: f64,
        confidence_upper: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), GatewayError>;

    /// Release any held connections. Default: nothing to do.
    async fn close(&self) {}
}
