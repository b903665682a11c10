//! Health, liveness, and readiness endpoint handlers.
//!
//! These handlers expose server health information for orchestrators
//! (Kubernetes, load balancers) and operational monitoring.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;

/// Returns detailed health information as JSON.
///
/// Always returns 200; `state` and `ready` in the body carry the verdict.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = state.shutdown.health_state();

    Json(json!({
        "state": health.as_str(),
        "ready": is_ready(&state),
        "backends": state.registry.backend_count(),
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Liveness probe: 200 whenever the process can answer.
pub async fn liveness_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "Liveness OK")
}

/// Readiness probe: 200 once serving with at least one backend installed,
/// 503 otherwise (including while draining).
pub async fn readiness_handler(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if is_ready(&state) {
        (StatusCode::OK, "Readiness OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Readiness NOT OK")
    }
}

pub(crate) fn is_ready(state: &AppState) -> bool {
    state.shutdown.is_accepting() && state.registry.is_ready()
}
