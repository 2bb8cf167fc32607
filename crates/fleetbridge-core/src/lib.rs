//! Shared foundation for the FleetBridge control-plane bridge.
//!
//! Provides:
//! - Configuration types and environment variable helpers
//! - The bridge-wide error taxonomy

pub mod config;
pub mod error;

pub use config::{BridgeConfig, EngineConfig, HttpConfig, MqttConfig};
pub use error::{BridgeError, BridgeResult};

/// Stable device identifier (e.g. "robot-01").
pub type DeviceId = String;

/// Unique token tagging an in-flight command so its asynchronous
/// response can be matched back to the issuing request.
pub type CorrelationId = String;
