//! HTTP surface for the bridge: command submission, command history,
//! device state queries and health.

pub mod handlers;
pub mod models;
pub mod server;

pub use models::{ApiResponse, ErrorResponse};
pub use server::{create_router, ServerState};
