//! Application router and server state.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use fleetbridge_core::config::EngineConfig;
use fleetbridge_engine::Engine;

use crate::handlers::{basic, commands, devices};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<Engine>,
    pub engine_config: EngineConfig,
    pub started_at: i64,
}

impl ServerState {
    pub fn new(engine: Arc<Engine>, engine_config: EngineConfig) -> Self {
        Self {
            engine,
            engine_config,
            started_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Create the application router.
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/api/health", get(basic::health_handler))
        .route(
            "/api/commands",
            post(commands::submit_command_handler).get(commands::list_commands_handler),
        )
        .route("/api/commands/:id", get(commands::get_command_handler))
        .route("/api/devices", get(devices::list_devices_handler))
        .route("/api/devices/:id/state", get(devices::device_state_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
