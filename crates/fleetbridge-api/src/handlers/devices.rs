//! Device listing and state query handlers.

use axum::extract::{Path, State};

use fleetbridge_engine::{DeviceSnapshot, StateView};

use super::ServerState;
use crate::models::{ApiResponse, ApiResult};

/// Every device ever observed, with its connectivity.
pub async fn list_devices_handler(
    State(state): State<ServerState>,
) -> ApiResult<Vec<DeviceSnapshot>> {
    Ok(ApiResponse::success(state.engine.list_devices()))
}

/// Last-known state of one device with staleness annotation.
pub async fn device_state_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> ApiResult<StateView> {
    let view = state.engine.get_device_state(&id)?;
    Ok(ApiResponse::success(view))
}
