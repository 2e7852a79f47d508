//! bioprocess-pipeline - Real-time edge data pipeline service
//!
//! Cleans windowed sensor data, derives biochemical features and serves the
//! pipeline control surface.
//!
//! # Usage
//!
//! ```bash
//! # Start the service (worker idle until POST /start)
//! bioprocess-pipeline
//!
//! # Start processing immediately
//! bioprocess-pipeline --auto-start
//!
//! # Bind the control surface elsewhere
//! bioprocess-pipeline --addr 0.0.0.0:9001
//! ```
//!
//! # Environment Variables
//!
//! - `INFLUX_URL`, `INFLUX_TOKEN`, `INFLUX_ORG`, `INFLUX_BUCKET_RAW`,
//!   `INFLUX_BUCKET_30S`, `INFLUX_BUCKET_PRED`: TSDB access
//! - `MQTT_BROKER`, `MQTT_PORT`, `MQTT_USERNAME`, `MQTT_PASSWORD`: alerts
//! - `WINDOW_SIZE_SECONDS`, `PROCESSING_INTERVAL_SECONDS`, `VESSEL_ID`
//! - `PHYSICAL_BOUNDS`: JSON override of the per-sensor plausibility table
//! - `LOG_LEVEL`: tracing filter (default INFO)

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bioprocess_pipeline::api::{api_routes, ApiState};
use bioprocess_pipeline::config::Settings;
use bioprocess_pipeline::gateway::InfluxGateway;
use bioprocess_pipeline::monitoring::MonitoringService;
use bioprocess_pipeline::pipeline::PipelineHandle;

#[derive(Parser, Debug)]
#[command(name = "bioprocess-pipeline")]
#[command(about = "Bioprocess edge data pipeline service")]
#[command(version)]
struct CliArgs {
    /// Override the control surface bind address (default from SERVER_ADDR)
    #[arg(short, long)]
    addr: Option<String>,

    /// Start the continuous worker immediately instead of waiting for
    /// POST /start
    #[arg(long)]
    auto_start: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real deployments set the environment directly
    let _ = dotenvy::dotenv();

    let args = CliArgs::parse();

    let settings = Settings::from_env().context("Invalid configuration, refusing to start")?;

    let filter = EnvFilter::try_new(settings.log_level.to_lowercase())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        vessel = %settings.vessel_id,
        window = settings.window_size_seconds,
        interval = settings.processing_interval_seconds,
        "Starting data pipeline service"
    );

    let settings = Arc::new(settings);

    let gateway =
        Arc::new(InfluxGateway::new(settings.clone()).context("Failed to build TSDB gateway")?);

    let mut monitoring = MonitoringService::new(settings.clone());
    monitoring.connect_broker().await;
    if !monitoring.alerts_enabled() {
        warn!("Alert broker unavailable, alerts will be logged only");
    }
    let monitoring = Arc::new(monitoring);

    let pipeline = PipelineHandle::new(settings.clone(), gateway, monitoring.clone());

    if args.auto_start {
        pipeline.clone().start().await;
    }

    let state = ApiState {
        pipeline: Some(pipeline.clone()),
        monitoring,
    };
    let app = api_routes(state);

    let addr = args.addr.unwrap_or_else(|| settings.server_addr.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "Control surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(pipeline))
        .await
        .context("Server error")?;

    info!("Service stopped");
    Ok(())
}

/// Wait for ctrl-c, then stop the worker before letting the server drain.
async fn shutdown_signal(pipeline: Arc<PipelineHandle>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
    pipeline.stop().await;
}
