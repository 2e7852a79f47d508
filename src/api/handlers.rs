//! Control surface handlers: liveness, status, start/stop, one-shot
//! processing, batch reset, quality stats, config echo and metrics scrape.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

use super::envelope::{ApiErrorResponse, ApiResponse};
use super::ApiState;
use crate::cleaning::QualityStats;

/// Service name reported by the liveness endpoints.
const SERVICE_NAME: &str = "bioprocess-pipeline";

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// GET / and GET /health — liveness.
pub async fn get_health(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(HealthBody {
        status: if state.pipeline.is_some() {
            "healthy"
        } else {
            "initializing"
        },
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
struct StatusBody {
    is_running: bool,
    cycle_count: u64,
    quality_stats: QualityStats,
    uptime_seconds: u64,
}

/// GET /status — run state, cycle count and cumulative quality stats.
pub async fn get_status(State(state): State<ApiState>) -> Response {
    let Some(pipeline) = state.pipeline else {
        return ApiErrorResponse::service_unavailable("Pipeline not initialized");
    };

    ApiResponse::ok(StatusBody {
        is_running: pipeline.is_running(),
        cycle_count: pipeline.cycle_count().await,
        quality_stats: pipeline.quality_stats().await,
        uptime_seconds: pipeline.uptime_seconds(),
    })
}

/// POST /start — launch the continuous worker (idempotent).
pub async fn post_start(State(state): State<ApiState>) -> Response {
    let Some(pipeline) = state.pipeline else {
        return ApiErrorResponse::service_unavailable("Pipeline not initialized");
    };

    if pipeline.clone().start().await {
        ApiResponse::ok(json!({
            "message": "Pipeline started",
            "interval_seconds": pipeline.settings().processing_interval_seconds,
        }))
    } else {
        ApiResponse::ok(json!({
            "message": "Pipeline is already running",
            "cycle_count": pipeline.cycle_count().await,
        }))
    }
}

/// POST /stop — request cooperative cancellation (idempotent).
pub async fn post_stop(State(state): State<ApiState>) -> Response {
    let Some(pipeline) = state.pipeline else {
        return ApiErrorResponse::service_unavailable("Pipeline not initialized");
    };

    if !pipeline.stop().await {
        return ApiResponse::ok(json!({"message": "Pipeline is not running"}));
    }

    ApiResponse::ok(json!({
        "message": "Pipeline stopped",
        "total_cycles": pipeline.cycle_count().await,
        "quality_stats": pipeline.quality_stats().await,
    }))
}

/// POST /process-window — one-shot cycle, allowed in any state.
pub async fn post_process_window(State(state): State<ApiState>) -> Response {
    let Some(pipeline) = state.pipeline else {
        return ApiErrorResponse::service_unavailable("Pipeline not initialized");
    };

    match pipeline.process_once().await {
        Ok(features) => ApiResponse::ok(json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "feature_count": features.len(),
            "features": features,
        })),
        Err(_) => ApiErrorResponse::internal("Window processing failed"),
    }
}

/// POST /reset — reset batch state (quality stats, cumulative history,
/// cycle counter).
pub async fn post_reset(State(state): State<ApiState>) -> Response {
    let Some(pipeline) = state.pipeline else {
        return ApiErrorResponse::service_unavailable("Pipeline not initialized");
    };

    pipeline.reset_batch().await;
    ApiResponse::ok(json!({"message": "Pipeline reset for new batch"}))
}

/// GET /quality-stats — cumulative cleaner counters.
pub async fn get_quality_stats(State(state): State<ApiState>) -> Response {
    let Some(pipeline) = state.pipeline else {
        return ApiErrorResponse::service_unavailable("Pipeline not initialized");
    };

    ApiResponse::ok(json!({
        "stats": pipeline.quality_stats().await,
        "total_cycles": pipeline.cycle_count().await,
    }))
}

/// GET /config — effective configuration echo (no credentials).
pub async fn get_config(State(state): State<ApiState>) -> Response {
    let Some(pipeline) = state.pipeline else {
        return ApiErrorResponse::service_unavailable("Pipeline not initialized");
    };

    let settings = pipeline.settings();
    ApiResponse::ok(json!({
        "window_size_seconds": settings.window_size_seconds,
        "processing_interval_seconds": settings.processing_interval_seconds,
        "vessel_id": &settings.vessel_id,
        "influx_bucket_raw": &settings.influx_bucket_raw,
        "influx_bucket_30s": &settings.influx_bucket_30s,
        "influx_bucket_pred": &settings.influx_bucket_pred,
        "physical_bounds": &settings.physical_bounds,
    }))
}

/// GET /metrics — Prometheus text exposition.
pub async fn get_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = state.monitoring.render_prometheus().await;
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}
