//! Alert types and the MQTT publisher.
//!
//! Alerts go to `bioprocess/pichia/<vessel>/alarms/<category>` at QoS 1 with
//! a JSON payload. When the broker is unreachable at startup, alerting is
//! disabled for the process lifetime and alerts are logged instead; the
//! pipeline itself keeps running.

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Settings;

/// MQTT client id used on the broker.
const CLIENT_ID: &str = "pipeline-monitor";
/// How long to wait for the broker's ConnAck before disabling alerts.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Severity levels, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

/// Alert routing category; doubles as the topic suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    DataQuality,
    MissingData,
    SensorFailure,
    ProcessAnomaly,
    MetabolicShift,
    EquipmentWarning,
}

impl AlertCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::DataQuality => "data_quality",
            AlertCategory::MissingData => "missing_data",
            AlertCategory::SensorFailure => "sensor_failure",
            AlertCategory::ProcessAnomaly => "process_anomaly",
            AlertCategory::MetabolicShift => "metabolic_shift",
            AlertCategory::EquipmentWarning => "equipment_warning",
        }
    }
}

/// One triggered alert condition for one cycle. The pipeline emits repeats on
/// subsequent cycles; consumers de-duplicate.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub category: AlertCategory,
    pub message: String,
    pub metadata: serde_json::Value,
}

impl Alert {
    pub fn new(
        level: AlertLevel,
        category: AlertCategory,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            level,
            category,
            message: message.into(),
            metadata,
        }
    }
}

/// MQTT alert channel.
pub struct AlertPublisher {
    client: AsyncClient,
    vessel_id: String,
}

impl AlertPublisher {
    /// Connect to the broker and verify the ConnAck before handing the
    /// publisher out. Returns `None` when the broker cannot be reached;
    /// callers treat that as "alerts disabled".
    pub async fn connect(settings: &Settings) -> Option<Self> {
        let mut options = MqttOptions::new(
            CLIENT_ID.to_string(),
            settings.mqtt_broker.clone(),
            settings.mqtt_port,
        );
        options.set_keep_alive(Duration::from_secs(60));
        if !settings.mqtt_username.is_empty() {
            options.set_credentials(
                settings.mqtt_username.clone(),
                settings.mqtt_password.clone(),
            );
        }

        let (client, mut eventloop) = AsyncClient::new(options, 16);

        // First poll drives the CONNECT handshake
        match tokio::time::timeout(CONNECT_TIMEOUT, eventloop.poll()).await {
            Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                info!(
                    broker = %settings.mqtt_broker,
                    port = settings.mqtt_port,
                    "MQTT client connected"
                );
            }
            Ok(Ok(other)) => {
                warn!(event = ?other, "Unexpected first MQTT event, continuing");
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to MQTT broker, alerts disabled");
                return None;
            }
            Err(_) => {
                error!("MQTT broker connection timed out, alerts disabled");
                return None;
            }
        }

        // Keep the event loop alive; rumqttc reconnects on the next poll
        // after a transport error.
        tokio::spawn(async move {
            loop {
                if let Err(e) = eventloop.poll().await {
                    warn!(error = %e, "MQTT event loop error, retrying");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        });

        Some(Self {
            client,
            vessel_id: settings.vessel_id.clone(),
        })
    }

    /// Publish one alert at QoS 1.
    pub async fn publish(&self, alert: &Alert) {
        let topic = format!(
            "bioprocess/pichia/{}/alarms/{}",
            self.vessel_id,
            alert.category.as_str()
        );
        let payload = serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "level": alert.level.as_str(),
            "category": alert.category.as_str(),
            "message": &alert.message,
            "vessel": &self.vessel_id,
            "metadata": &alert.metadata,
        });

        match self
            .client
            .publish(topic.as_str(), QoS::AtLeastOnce, false, payload.to_string())
            .await
        {
            Ok(()) => info!(level = alert.level.as_str(), message = %alert.message, "Alert sent"),
            Err(e) => error!(error = %e, topic = %topic, "Failed to send alert"),
        }
    }
}
