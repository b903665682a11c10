//! Pipeline composition: combines all middleware layers into a single service stack.

use tower::ServiceBuilder;

use super::metrics::{MetricsLayer, MetricsService};
use super::timeout::{TimeoutLayer, TimeoutService};
use crate::service::dispatch::ToolService;

/// Build the operation pipeline by wrapping the `ToolService` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- record timing and outcome, including timeouts
/// 2. `TimeoutLayer` -- enforce the per-request deadline
///
/// The returned service implements `tower::Service<Operation>` and is cheap
/// to clone per request.
pub type OperationPipeline = MetricsService<TimeoutService<ToolService>>;

#[must_use]
pub fn build_operation_pipeline(service: ToolService) -> OperationPipeline {
    ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(TimeoutLayer)
        .service(service)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
