//! Command submission and history handlers.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use fleetbridge_engine::{CommandInfo, CommandOutcome, CommandStatus};

use tracing::debug;

use super::ServerState;
use crate::models::{ApiResponse, ApiResult, ErrorResponse};

#[derive(Debug, Deserialize)]
pub struct SubmitCommandRequest {
    pub device_id: String,
    pub payload: serde_json::Value,
    /// Engine-side deadline; defaults to the configured timeout
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CommandQueryParams {
    pub device_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// Submit a command and wait for its terminal outcome.
///
/// The HTTP wait covers the engine's full retry schedule, so the engine
/// always resolves the handle before the wait gives up.
pub async fn submit_command_handler(
    State(state): State<ServerState>,
    Json(request): Json<SubmitCommandRequest>,
) -> ApiResult<CommandOutcome> {
    let timeout = request.timeout_ms.map(Duration::from_millis);
    let handle = state
        .engine
        .submit_command(&request.device_id, request.payload, timeout)
        .await?;
    debug!(
        correlation_id = handle.correlation_id(),
        device_id = handle.device_id(),
        "command accepted"
    );

    let config = &state.engine_config;
    let per_attempt = timeout.unwrap_or_else(|| config.default_timeout());
    let caller_timeout =
        per_attempt * (config.max_retries + 1) + config.sweep_interval() * 2;

    let outcome = handle.wait(caller_timeout).await?;
    Ok(ApiResponse::success(outcome))
}

/// Recent and in-flight commands, optionally filtered.
pub async fn list_commands_handler(
    State(state): State<ServerState>,
    Query(params): Query<CommandQueryParams>,
) -> ApiResult<Vec<CommandInfo>> {
    let status = params.status.as_deref().map(parse_status).transpose()?;
    let limit = params.limit.unwrap_or(50);
    let commands = state
        .engine
        .list_commands(params.device_id.as_deref(), status, limit);
    Ok(ApiResponse::success(commands))
}

/// Single command lookup across the live table and the history.
pub async fn get_command_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> ApiResult<CommandInfo> {
    state
        .engine
        .find_command(&id)
        .map(ApiResponse::success)
        .ok_or_else(|| ErrorResponse::not_found(format!("command not found: {id}")))
}

fn parse_status(s: &str) -> Result<CommandStatus, ErrorResponse> {
    match s {
        "pending" => Ok(CommandStatus::Pending),
        "acknowledged" => Ok(CommandStatus::Acknowledged),
        "completed" => Ok(CommandStatus::Completed),
        "failed" => Ok(CommandStatus::Failed),
        "expired" => Ok(CommandStatus::Expired),
        other => Err(ErrorResponse::bad_request(format!(
            "unknown status filter: {other}"
        ))),
    }
}
