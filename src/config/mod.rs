//! Pipeline Configuration
//!
//! All deployment-specific settings come from the environment (with `.env`
//! support via `dotenvy` in `main`), matching how the edge stack is deployed
//! alongside the broker and the TSDB in one compose file. Every key has a
//! default so a bare dev environment starts; malformed values are fatal.
//!
//! Process constants (working volume, standard pressure, inlet O₂ fraction)
//! and the data-quality thresholds are fixed per deployment and live here as
//! plain fields rather than env-tunable knobs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::sensors::SensorTag;

/// Physical-plausibility interval for one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Configuration errors are fatal: the service refuses to start rather than
/// run with a half-understood environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("unparsable PHYSICAL_BOUNDS override: {0}")]
    InvalidBounds(String),

    #[error("unknown sensor tag in PHYSICAL_BOUNDS override: {0}")]
    UnknownSensor(String),
}

/// Pipeline service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // MQTT broker
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_username: String,
    pub mqtt_password: String,

    // InfluxDB
    pub influx_url: String,
    pub influx_token: String,
    pub influx_org: String,
    pub influx_bucket_raw: String,
    pub influx_bucket_30s: String,
    pub influx_bucket_pred: String,

    // Pipeline
    pub window_size_seconds: u64,
    pub processing_interval_seconds: u64,
    pub vessel_id: String,

    // HTTP control surface
    pub server_addr: String,

    // Per-call TSDB timeout; must stay below the processing interval so a
    // stuck dependency cannot monopolize a cycle.
    pub request_timeout_seconds: u64,

    // Data quality thresholds
    pub max_missing_duration_interpolate_minutes: f64,
    pub max_missing_duration_smoother_minutes: f64,
    pub outlier_zscore_threshold: f64,

    // Physical bounds for validation
    pub physical_bounds: BTreeMap<SensorTag, Bounds>,

    // Process constants
    pub working_volume_l: f64,
    pub standard_pressure_bar: f64,
    pub air_o2_fraction: f64,

    // Logging
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mqtt_broker: "mosquitto".to_string(),
            mqtt_port: 1883,
            mqtt_username: String::new(),
            mqtt_password: String::new(),
            influx_url: "http://influxdb:8086".to_string(),
            influx_token: "my-super-secret-auth-token".to_string(),
            influx_org: "bioprocess".to_string(),
            influx_bucket_raw: "pichia_raw".to_string(),
            influx_bucket_30s: "pichia_30s".to_string(),
            influx_bucket_pred: "pichia_pred".to_string(),
            window_size_seconds: 30,
            processing_interval_seconds: 30,
            vessel_id: "vessel1".to_string(),
            server_addr: "0.0.0.0:8001".to_string(),
            request_timeout_seconds: 10,
            max_missing_duration_interpolate_minutes: 5.0,
            max_missing_duration_smoother_minutes: 30.0,
            outlier_zscore_threshold: 3.0,
            physical_bounds: default_physical_bounds(),
            working_volume_l: 0.9,
            standard_pressure_bar: 1.013,
            air_o2_fraction: 0.21,
            log_level: "INFO".to_string(),
        }
    }
}

impl Settings {
    /// Build settings from the process environment.
    ///
    /// Unset keys fall back to defaults; set-but-malformed keys are a
    /// [`ConfigError`] and the caller must abort startup.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Ok(v) = std::env::var("MQTT_BROKER") {
            settings.mqtt_broker = v;
        }
        settings.mqtt_port = parse_env("MQTT_PORT", settings.mqtt_port)?;
        if let Ok(v) = std::env::var("MQTT_USERNAME") {
            settings.mqtt_username = v;
        }
        if let Ok(v) = std::env::var("MQTT_PASSWORD") {
            settings.mqtt_password = v;
        }

        if let Ok(v) = std::env::var("INFLUX_URL") {
            settings.influx_url = v;
        }
        if let Ok(v) = std::env::var("INFLUX_TOKEN") {
            settings.influx_token = v;
        }
        if let Ok(v) = std::env::var("INFLUX_ORG") {
            settings.influx_org = v;
        }
        if let Ok(v) = std::env::var("INFLUX_BUCKET_RAW") {
            settings.influx_bucket_raw = v;
        }
        if let Ok(v) = std::env::var("INFLUX_BUCKET_30S") {
            settings.influx_bucket_30s = v;
        }
        if let Ok(v) = std::env::var("INFLUX_BUCKET_PRED") {
            settings.influx_bucket_pred = v;
        }

        settings.window_size_seconds =
            parse_env("WINDOW_SIZE_SECONDS", settings.window_size_seconds)?;
        settings.processing_interval_seconds = parse_env(
            "PROCESSING_INTERVAL_SECONDS",
            settings.processing_interval_seconds,
        )?;
        if let Ok(v) = std::env::var("VESSEL_ID") {
            settings.vessel_id = v;
        }
        if let Ok(v) = std::env::var("SERVER_ADDR") {
            settings.server_addr = v;
        }
        settings.request_timeout_seconds =
            parse_env("REQUEST_TIMEOUT_SECONDS", settings.request_timeout_seconds)?;

        if let Ok(v) = std::env::var("LOG_LEVEL") {
            settings.log_level = v;
        }

        if let Ok(raw) = std::env::var("PHYSICAL_BOUNDS") {
            apply_bounds_override(&mut settings.physical_bounds, &raw)?;
        }

        Ok(settings)
    }

    /// Bounds for a tag, if declared.
    pub fn bounds_for(&self, tag: SensorTag) -> Option<Bounds> {
        self.physical_bounds.get(&tag).copied()
    }
}

/// Parse an env var with a typed default.
fn parse_env<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
            key,
            value: raw,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Merge a JSON bounds override (`{"pH": {"min": 3.0, "max": 9.0}}`) over the
/// defaults. Unknown tags and malformed JSON are fatal.
fn apply_bounds_override(
    bounds: &mut BTreeMap<SensorTag, Bounds>,
    raw: &str,
) -> Result<(), ConfigError> {
    let parsed: BTreeMap<String, Bounds> =
        serde_json::from_str(raw).map_err(|e| ConfigError::InvalidBounds(e.to_string()))?;

    for (name, b) in parsed {
        let tag = SensorTag::from_canonical(&name)
            .ok_or_else(|| ConfigError::UnknownSensor(name.clone()))?;
        if !(b.min < b.max) {
            return Err(ConfigError::InvalidBounds(format!(
                "{name}: min {} must be below max {}",
                b.min, b.max
            )));
        }
        bounds.insert(tag, b);
    }
    Ok(())
}

/// Physical-plausibility intervals for every sensor on the vessel.
pub fn default_physical_bounds() -> BTreeMap<SensorTag, Bounds> {
    use SensorTag::*;
    [
        (Ph, Bounds::new(2.0, 10.0)),
        (Do, Bounds::new(0.0, 100.0)),
        (Od, Bounds::new(0.0, 100.0)),
        (TempBroth, Bounds::new(20.0, 40.0)),
        (TempPhProbe, Bounds::new(20.0, 40.0)),
        (TempDoProbe, Bounds::new(20.0, 40.0)),
        (TempStirrerMotor, Bounds::new(15.0, 100.0)),
        (TempExhaust, Bounds::new(20.0, 50.0)),
        (GasMfcAir, Bounds::new(0.0, 3.0)),
        (StirSp, Bounds::new(0.0, 1200.0)),
        (StirTorque, Bounds::new(0.0, 100.0)),
        (ReactorPressure, Bounds::new(0.8, 1.6)),
        (Weight, Bounds::new(0.0, 15.0)),
        (HeaterPidOut, Bounds::new(0.0, 100.0)),
        (BasePumpRate, Bounds::new(0.0, 15.0)),
        (OffGasCo2, Bounds::new(0.0, 10.0)),
        (OffGasO2, Bounds::new(15.0, 25.0)),
        (GasFlowInlet, Bounds::new(0.0, 3.0)),
        (GasFlowOutlet, Bounds::new(0.0, 3.5)),
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_sensor() {
        let settings = Settings::default();
        for tag in crate::sensors::ALL_SENSOR_TAGS {
            assert!(
                settings.bounds_for(tag).is_some(),
                "missing bounds for {tag}"
            );
        }
    }

    #[test]
    fn test_default_bounds_values() {
        let settings = Settings::default();
        let ph = settings.bounds_for(SensorTag::Ph).unwrap();
        assert_eq!(ph.min, 2.0);
        assert_eq!(ph.max, 10.0);
        assert!(ph.contains(7.0));
        assert!(!ph.contains(0.5));
        assert!(!ph.contains(12.0));
    }

    #[test]
    fn test_bounds_override_merges_over_defaults() {
        let mut bounds = default_physical_bounds();
        apply_bounds_override(&mut bounds, r#"{"pH": {"min": 3.0, "max": 9.0}}"#).unwrap();
        let ph = bounds[&SensorTag::Ph];
        assert_eq!(ph.min, 3.0);
        assert_eq!(ph.max, 9.0);
        // Untouched tags keep their defaults
        assert_eq!(bounds[&SensorTag::Do].max, 100.0);
    }

    #[test]
    fn test_bounds_override_rejects_unknown_tag() {
        let mut bounds = default_physical_bounds();
        let err = apply_bounds_override(&mut bounds, r#"{"Flux_Capacitor": {"min": 0, "max": 1}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSensor(_)));
    }

    #[test]
    fn test_bounds_override_rejects_inverted_interval() {
        let mut bounds = default_physical_bounds();
        let err =
            apply_bounds_override(&mut bounds, r#"{"pH": {"min": 9.0, "max": 3.0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBounds(_)));
    }

    #[test]
    fn test_bounds_override_rejects_bad_json() {
        let mut bounds = default_physical_bounds();
        assert!(apply_bounds_override(&mut bounds, "not json").is_err());
    }

    #[test]
    fn test_process_constants() {
        let settings = Settings::default();
        assert_eq!(settings.working_volume_l, 0.9);
        assert_eq!(settings.standard_pressure_bar, 1.013);
        assert_eq!(settings.air_o2_fraction, 0.21);
        assert!(settings.request_timeout_seconds < settings.processing_interval_seconds);
    }
}
