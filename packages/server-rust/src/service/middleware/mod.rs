//! Tower middleware layers for the operation pipeline.
//!
//! - [`timeout`]: Per-request deadline enforcement
//! - [`metrics`]: Operation timing and counting via `tracing` spans and `metrics`
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use metrics::MetricsLayer;
pub use pipeline::{build_operation_pipeline, OperationPipeline};
pub use timeout::TimeoutLayer;
