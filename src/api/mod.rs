//! Control surface: small HTTP façade over the pipeline.
//!
//! Runs concurrently with the worker and never blocks it; lifecycle
//! endpoints only signal the worker through [`PipelineHandle`].

pub mod envelope;
pub mod handlers;
pub mod routes;

use std::sync::Arc;

use crate::monitoring::MonitoringService;
use crate::pipeline::PipelineHandle;

pub use routes::api_routes;

/// Shared state for the control surface. `pipeline` is `None` only while
/// startup is still wiring things together; handlers answer 503 then.
#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Option<Arc<PipelineHandle>>,
    pub monitoring: Arc<MonitoringService>,
}
