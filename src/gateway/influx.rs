//! InfluxDB v2 gateway
//!
//! Flux queries over `POST /api/v2/query` (annotated CSV response) and
//! line-protocol writes over `POST /api/v2/write` with nanosecond precision.
//! Every request carries the client-level timeout from configuration, kept
//! below the processing interval so a stuck store cannot absorb a cycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{GatewayError, TimeSeriesStore};
use crate::config::Settings;
use crate::sensors::SensorTag;
use crate::types::{FeatureSet, Sample, Window};

/// Gateway to the deployment's InfluxDB instance.
#[derive(Clone)]
pub struct InfluxGateway {
    http: reqwest::Client,
    settings: Arc<Settings>,
}

impl InfluxGateway {
    pub fn new(settings: Arc<Settings>) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()?;
        Ok(Self { http, settings })
    }

    fn query_url(&self) -> String {
        format!(
            "{}/api/v2/query?org={}",
            self.settings.influx_url.trim_end_matches('/'),
            self.settings.influx_org
        )
    }

    fn write_url(&self, bucket: &str) -> String {
        format!(
            "{}/api/v2/write?org={}&bucket={}&precision=ns",
            self.settings.influx_url.trim_end_matches('/'),
            self.settings.influx_org,
            bucket
        )
    }

    async fn post_lines(&self, bucket: &str, body: String) -> Result<(), GatewayError> {
        let response = self
            .http
            .post(self.write_url(bucket))
            .header("Authorization", format!("Token {}", self.settings.influx_token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Server { status, body });
        }
        Ok(())
    }
}

#[async_trait]
impl TimeSeriesStore for InfluxGateway {
    async fn read_window(
        &self,
        tag: SensorTag,
        duration: Duration,
    ) -> Result<Window, GatewayError> {
        let query = build_flux_query(
            &self.settings.influx_bucket_raw,
            tag.raw_measurement(),
            &self.settings.vessel_id,
            duration.as_secs(),
        );

        let response = self
            .http
            .post(self.query_url())
            .header("Authorization", format!("Token {}", self.settings.influx_token))
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Server { status, body });
        }

        let text = response.text().await?;
        let samples = parse_query_csv(&text);
        if samples.is_empty() {
            debug!(sensor = %tag, "No data in window");
        }
        Ok(Window::new(samples))
    }

    async fn write_features(
        &self,
        features: &FeatureSet,
        timestamp: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let lines = feature_lines(features, &self.settings.vessel_id, timestamp);
        if lines.is_empty() {
            return Ok(());
        }

        let count = lines.len();
        self.post_lines(&self.settings.influx_bucket_pred, lines.join("\n"))
            .await?;
        debug!(count, "Wrote features to TSDB");
        Ok(())
    }

    async fn write_prediction(
        &self,
        prediction: f64,
        confidence_lower: f64,
        confidence_upper: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let line = format!(
            "prediction,vessel={} od_predicted={},confidence_lower={},confidence_upper={} {}",
            self.settings.vessel_id,
            prediction,
            confidence_lower,
            confidence_upper,
            timestamp_ns(timestamp)
        );
        self.post_lines(&self.settings.influx_bucket_pred, line).await
    }

    async fn close(&self) {
        debug!("Gateway closed");
    }
}

/// Flux query for the trailing window of one raw measurement on one vessel.
fn build_flux_query(bucket: &str, measurement: &str, vessel: &str, seconds: u64) -> String {
    format!(
        r#"from(bucket: "{bucket}")
  |> range(start: -{seconds}s)
  |> filter(fn: (r) => r._measurement == "{measurement}")
  |> filter(fn: (r) => r._field == "_value" or r._field == "value")
  |> filter(fn: (r) => r.vessel == "{vessel}")
  |> keep(columns: ["_time", "_value"])
  |> sort(columns: ["_time"])
"#
    )
}

/// Parse the annotated-CSV query response into samples.
///
/// Annotation lines (`#datatype`, ...) are skipped; each table block carries
/// its own header naming the `_time` and `_value` columns. Unparsable or
/// empty values become NaN so the cleaner sees them as gaps.
fn parse_query_csv(text: &str) -> Vec<Sample> {
    let mut samples = Vec::new();
    let mut time_idx: Option<usize> = None;
    let mut value_idx: Option<usize> = None;

    for raw_line in text.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() {
            // Table separator: the next block re-announces its header
            time_idx = None;
            value_idx = None;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split(',').collect();

        if time_idx.is_none() {
            // Header row for this table block
            time_idx = fields.iter().position(|f| *f == "_time");
            value_idx = fields.iter().position(|f| *f == "_value");
            if time_idx.is_none() {
                warn!("Query response block without _time column");
            }
            continue;
        }

        let (Some(ti), Some(vi)) = (time_idx, value_idx) else {
            continue;
        };
        let Some(time_field) = fields.get(ti) else {
            continue;
        };
        let Ok(time) = DateTime::parse_from_rfc3339(time_field) else {
            continue;
        };

        let value = fields
            .get(vi)
            .and_then(|f| f.parse::<f64>().ok())
            .unwrap_or(f64::NAN);

        samples.push(Sample::new(time.with_timezone(&Utc), value));
    }

    samples
}

/// One line-protocol entry per finite feature.
fn feature_lines(features: &FeatureSet, vessel: &str, timestamp: DateTime<Utc>) -> Vec<String> {
    let ns = timestamp_ns(timestamp);
    features
        .iter()
        .filter(|(_, v)| v.is_finite())
        .map(|(name, value)| format!("features,vessel={vessel} {name}={value} {ns}"))
        .collect()
}

fn timestamp_ns(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_nanos_opt().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_flux_query_shape() {
        let q = build_flux_query("pichia_raw", "broth", "vessel1", 30);
        assert!(q.contains(r#"from(bucket: "pichia_raw")"#));
        assert!(q.contains("range(start: -30s)"));
        assert!(q.contains(r#"r._measurement == "broth""#));
        assert!(q.contains(r#"r.vessel == "vessel1""#));
        assert!(q.contains(r#"sort(columns: ["_time"])"#));
    }

    #[test]
    fn test_parse_annotated_csv() {
        let text = "\
#datatype,string,long,dateTime:RFC3339,double\r
#group,false,false,false,false\r
#default,_result,,,\r
,result,table,_time,_value\r
,_result,0,2025-06-01T12:00:00Z,7.01\r
,_result,0,2025-06-01T12:00:01Z,7.02\r
,_result,0,2025-06-01T12:00:02Z,\r
";
        let samples = parse_query_csv(text);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].value, 7.01);
        assert_eq!(samples[1].value, 7.02);
        assert!(samples[2].value.is_nan());
        assert_eq!(
            samples[1].time,
            DateTime::parse_from_rfc3339("2025-06-01T12:00:01Z").unwrap()
        );
    }

    #[test]
    fn test_parse_csv_multiple_tables() {
        let text = "\
,result,table,_time,_value
,_result,0,2025-06-01T12:00:00Z,1.0

,result,table,_time,_value
,_result,1,2025-06-01T12:00:05Z,2.0
";
        let samples = parse_query_csv(text);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].value, 2.0);
    }

    #[test]
    fn test_parse_empty_response() {
        assert!(parse_query_csv("").is_empty());
        assert!(parse_query_csv("\r\n").is_empty());
    }

    #[test]
    fn test_feature_lines_filter_non_finite() {
        let mut features: FeatureSet = BTreeMap::new();
        features.insert("CER".to_string(), 0.05);
        features.insert("RQ".to_string(), f64::NAN);
        features.insert("OUR".to_string(), f64::INFINITY);

        let ts = DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let lines = feature_lines(&features, "vessel1", ts);

        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("features,vessel=vessel1 CER=0.05 "));
        assert!(lines[0].ends_with(&ts.timestamp_nanos_opt().unwrap().to_string()));
    }

    #[test]
    fn test_feature_lines_empty_set() {
        let features: FeatureSet = BTreeMap::new();
        assert!(feature_lines(&features, "vessel1", Utc::now()).is_empty());
    }
}
