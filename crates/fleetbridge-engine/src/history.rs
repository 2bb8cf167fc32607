//! Bounded in-memory history of terminal commands.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleetbridge_core::{BridgeError, CorrelationId, DeviceId};

use crate::command::{Command, CommandStatus, Resolution};

/// Terminal record kept after a command leaves the correlation table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub correlation_id: CorrelationId,
    pub device_id: DeviceId,
    pub status: CommandStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fixed-capacity ring of the most recent terminal commands, newest
/// first on read. Oldest records are dropped once capacity is reached.
pub struct CommandHistory {
    records: Mutex<VecDeque<CommandRecord>>,
    capacity: usize,
}

impl CommandHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, command: &Command, resolution: &Resolution) {
        let now = Utc::now();
        let record = match resolution {
            Ok(outcome) => CommandRecord {
                correlation_id: command.correlation_id.clone(),
                device_id: command.device_id.clone(),
                status: outcome.status,
                attempts: command.attempt,
                created_at: command.created_at,
                resolved_at: outcome.completed_at,
                result: outcome.payload.clone(),
                error: outcome.error.clone(),
            },
            Err(err) => CommandRecord {
                correlation_id: command.correlation_id.clone(),
                device_id: command.device_id.clone(),
                status: match err {
                    BridgeError::Timeout { .. } => CommandStatus::Expired,
                    _ => CommandStatus::Failed,
                },
                attempts: command.attempt,
                created_at: command.created_at,
                resolved_at: now,
                result: None,
                error: Some(err.to_string()),
            },
        };

        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Most recent records first, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<CommandRecord> {
        let records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.iter().rev().take(limit).cloned().collect()
    }

    /// Lookup a terminal record by correlation identifier.
    pub fn find(&self, correlation_id: &str) -> Option<CommandRecord> {
        let records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records
            .iter()
            .rev()
            .find(|r| r.correlation_id == correlation_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        match self.records.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
