//! Control surface route definitions.
//!
//! - `GET  /`, `GET /health`  — liveness
//! - `GET  /status`           — run state, cycle count, quality stats
//! - `POST /start`, `/stop`   — worker lifecycle (idempotent)
//! - `POST /process-window`   — one-shot cycle
//! - `POST /reset`            — batch reset
//! - `GET  /quality-stats`    — cumulative cleaner counters
//! - `GET  /config`           — effective configuration echo
//! - `GET  /metrics`          — Prometheus scrape

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::{handlers, ApiState};

/// Build the control surface router.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/", get(handlers::get_health))
        .route("/health", get(handlers::get_health))
        .route("/status", get(handlers::get_status))
        .route("/start", post(handlers::post_start))
        .route("/stop", post(handlers::post_stop))
        .route("/process-window", post(handlers::post_process_window))
        .route("/reset", post(handlers::post_reset))
        .route("/quality-stats", get(handlers::get_quality_stats))
        .route("/config", get(handlers::get_config))
        .route("/metrics", get(handlers::get_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
