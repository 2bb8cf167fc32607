//! Command correlation and device state engine.
//!
//! Turns the fire-and-forget MQTT channel into request/response semantics
//! for HTTP callers:
//! - [`Dispatcher`] assigns correlation identifiers and publishes commands
//! - [`CorrelationTable`] maps in-flight commands to pending result handles
//! - [`Matcher`] routes inbound acks/results/telemetry back to waiters
//! - [`Supervisor`] enforces timeout, retry and device liveness policy
//! - [`DeviceRegistry`] keeps each robot's last-known state snapshot

pub mod command;
pub mod correlation;
pub mod dispatcher;
pub mod engine;
pub mod history;
pub mod matcher;
pub mod message;
pub mod registry;
pub mod supervisor;
pub mod transport;

pub use command::{Command, CommandOutcome, CommandStatus};
pub use correlation::{CommandHandle, CorrelationTable};
pub use dispatcher::Dispatcher;
pub use engine::{CommandInfo, Engine};
pub use history::{CommandHistory, CommandRecord};
pub use matcher::Matcher;
pub use message::InboundMessage;
pub use registry::{Connectivity, DeviceRegistry, DeviceSnapshot, StateView};
pub use supervisor::Supervisor;
pub use transport::{CommandTransport, RawInbound, TransportError};

#[cfg(feature = "mqtt")]
pub use transport::mqtt::MqttTransport;
