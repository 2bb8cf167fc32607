//! Health check handler.

use axum::extract::State;
use serde::Serialize;

use super::ServerState;
use crate::models::ApiResponse;

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub pending_commands: usize,
}

pub async fn health_handler(State(state): State<ServerState>) -> ApiResponse<HealthStatus> {
    let uptime = chrono::Utc::now().timestamp() - state.started_at;
    ApiResponse::success(HealthStatus {
        status: "ok",
        service: "fleetbridge",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: uptime.max(0) as u64,
        mqtt_connected: state.engine.is_transport_connected(),
        pending_commands: state.engine.pending_count(),
    })
}
