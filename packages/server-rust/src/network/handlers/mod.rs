//! HTTP handler definitions for the relay.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod health;
pub mod rpc;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use rpc::{flat_rpc_handler, split_rpc_handler};

use std::sync::Arc;
use std::time::Instant;

use super::ShutdownController;
use crate::service::{BackendRegistry, OperationClassifier, OperationPipeline};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Installed backends; empty until initialization completes.
    pub registry: Arc<BackendRegistry>,
    pub classifier: Arc<OperationClassifier>,
    /// Metrics, timeout and execution layers; cloned per request.
    pub pipeline: OperationPipeline,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}
