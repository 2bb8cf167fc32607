//! Command data structures.
//!
//! Defines the lifecycle types for commands flowing through the bridge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleetbridge_core::{BridgeError, CorrelationId, DeviceId};

/// Command status tracking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    /// Published, no reaction from the device yet
    Pending,
    /// Device acknowledged receipt, result outstanding
    Acknowledged,
    /// Device reported success
    Completed,
    /// Device reported failure, or the publish itself failed
    Failed,
    /// Deadline passed after exhausting retries
    Expired,
}

impl CommandStatus {
    /// Check if the command is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Completed | CommandStatus::Failed | CommandStatus::Expired
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Acknowledged => "acknowledged",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
            CommandStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// An in-flight command, owned by the correlation table from creation
/// until a terminal status moves its outcome to the caller's handle.
#[derive(Debug, Clone)]
pub struct Command {
    /// Correlation identifier, unique among currently-pending commands
    pub correlation_id: CorrelationId,
    /// Target device
    pub device_id: DeviceId,
    /// Opaque command payload, forwarded to the device as-is
    pub payload: serde_json::Value,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Deadline for the current attempt
    pub deadline: DateTime<Utc>,
    /// Per-attempt timeout, used to extend the deadline on retry
    pub timeout: chrono::Duration,
    /// Publish attempts made so far (1 after the initial send)
    pub attempt: u32,
    /// Current status
    pub status: CommandStatus,
}

impl Command {
    /// Create a new pending command with `deadline = now + timeout`.
    pub fn new(
        correlation_id: CorrelationId,
        device_id: DeviceId,
        payload: serde_json::Value,
        timeout: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            correlation_id,
            device_id,
            payload,
            created_at: now,
            deadline: now + timeout,
            timeout,
            attempt: 1,
            status: CommandStatus::Pending,
        }
    }

    /// Check whether the current attempt's deadline has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }

    /// Record a retry attempt: bump the counter and extend the deadline
    /// by the original per-attempt timeout. Status is unchanged so a
    /// late reply to the original publish still matches.
    pub fn record_retry(&mut self, now: DateTime<Utc>) {
        self.attempt += 1;
        self.deadline = now + self.timeout;
    }
}

/// Terminal outcome of a command, delivered through the pending handle
/// and recorded in the history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub correlation_id: CorrelationId,
    pub device_id: DeviceId,
    /// Terminal status (`completed` or `failed`)
    pub status: CommandStatus,
    /// Device response payload (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Failure message reported by the device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl CommandOutcome {
    /// Successful completion carrying the device's result payload.
    pub fn completed(
        correlation_id: CorrelationId,
        device_id: DeviceId,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            correlation_id,
            device_id,
            status: CommandStatus::Completed,
            payload,
            error: None,
            completed_at: Utc::now(),
        }
    }

    /// Failure reported by the device itself.
    pub fn failed(
        correlation_id: CorrelationId,
        device_id: DeviceId,
        error: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            device_id,
            status: CommandStatus::Failed,
            payload: None,
            error: Some(error.into()),
            completed_at: Utc::now(),
        }
    }
}

/// What flows through the pending result handle: either a device-reported
/// outcome or a bridge-level error (timeout, transport failure).
pub type Resolution = Result<CommandOutcome, BridgeError>;
