//! HTTP probes served next to the WebSocket endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::network::HealthState;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub state: &'static str,
    pub connections: usize,
    pub capacity: usize,
    pub uptime_secs: u64,
}

/// Returns listener health as JSON.
///
/// Always returns 200 -- the `state` field in the body says whether the
/// listener is actually accepting sessions.
pub(crate) async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        state: state.sessions.shutdown.health_state().as_str(),
        connections: state.sessions.connection_count(),
        capacity: state.sessions.capacity(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Liveness probe -- always returns 200 OK while the process serves HTTP.
pub(crate) async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe -- 200 when accepting sessions, 503 otherwise.
pub(crate) async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.sessions.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
