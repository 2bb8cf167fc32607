//! Device registry: last-known state per robot with liveness tracking.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use fleetbridge_core::{BridgeError, BridgeResult, DeviceId};

/// Connectivity goes `Online -> Stale -> Offline` under silence; only a
/// broker disconnect event drops a device straight to `Offline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Stale,
    Offline,
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connectivity::Online => write!(f, "online"),
            Connectivity::Stale => write!(f, "stale"),
            Connectivity::Offline => write!(f, "offline"),
        }
    }
}

/// Last-known view of a single device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub device_id: DeviceId,
    /// Opaque state payload reported by the device
    pub state: Value,
    /// Device-clock unix millis of the stored state; ordering key for
    /// last-writer-wins
    pub state_timestamp: i64,
    /// Server-clock time of the last message from this device; liveness
    /// is judged on this, never on the device clock
    pub last_seen: DateTime<Utc>,
    pub connectivity: Connectivity,
}

/// State query answer: snapshot plus its age at query time.
#[derive(Debug, Clone, Serialize)]
pub struct StateView {
    pub state: Value,
    pub connectivity: Connectivity,
    pub age_ms: i64,
}

/// Shared registry of every device ever observed. Devices are created on
/// first reference and never deleted.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<DeviceId, DeviceSnapshot>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record any message from a device: refresh `last_seen` and flip the
    /// device back online. Creates the entry on first sight.
    pub fn touch(&self, device_id: &str, now: DateTime<Utc>) {
        let mut entry = self
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| {
                info!(device_id, "device observed for the first time");
                DeviceSnapshot {
                    device_id: device_id.to_string(),
                    state: Value::Null,
                    state_timestamp: 0,
                    last_seen: now,
                    connectivity: Connectivity::Online,
                }
            });
        entry.last_seen = now;
        entry.connectivity = Connectivity::Online;
    }

    /// Apply a telemetry report. The state payload is stored only when its
    /// device timestamp is not older than the stored one; `last_seen` and
    /// connectivity refresh unconditionally.
    pub fn apply_telemetry(&self, device_id: &str, state: Value, timestamp: i64, now: DateTime<Utc>) {
        self.touch(device_id, now);
        let Some(mut entry) = self.devices.get_mut(device_id) else {
            return;
        };
        if timestamp >= entry.state_timestamp {
            entry.state = state;
            entry.state_timestamp = timestamp;
        } else {
            debug!(
                device_id,
                incoming = timestamp,
                stored = entry.state_timestamp,
                "discarding out-of-order state update"
            );
        }
    }

    /// Broker session established for a device client.
    pub fn mark_connected(&self, device_id: &str, now: DateTime<Utc>) {
        self.touch(device_id, now);
        info!(device_id, "device connected");
    }

    /// Broker session closed: straight to `Offline`, unlike silence.
    pub fn mark_disconnected(&self, device_id: &str) {
        if let Some(mut entry) = self.devices.get_mut(device_id) {
            entry.connectivity = Connectivity::Offline;
            info!(device_id, "device disconnected");
        }
    }

    /// Liveness sweep: demote silent devices one step per threshold.
    pub fn sweep_liveness(&self, now: DateTime<Utc>, stale_after: Duration, offline_after: Duration) {
        for mut entry in self.devices.iter_mut() {
            let silence = now - entry.last_seen;
            match entry.connectivity {
                Connectivity::Online if silence >= stale_after => {
                    entry.connectivity = Connectivity::Stale;
                    debug!(device_id = %entry.device_id, "device stale");
                }
                Connectivity::Stale if silence >= offline_after => {
                    entry.connectivity = Connectivity::Offline;
                    info!(device_id = %entry.device_id, "device offline after prolonged silence");
                }
                _ => {}
            }
        }
    }

    /// Last-known state with staleness annotation. Never blocks on the
    /// transport.
    pub fn get_state(&self, device_id: &str, now: DateTime<Utc>) -> BridgeResult<StateView> {
        let entry = self
            .devices
            .get(device_id)
            .ok_or_else(|| BridgeError::DeviceUnknown(device_id.to_string()))?;
        Ok(StateView {
            state: entry.state.clone(),
            connectivity: entry.connectivity,
            age_ms: (now - entry.last_seen).num_milliseconds().max(0),
        })
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceSnapshot> {
        self.devices.get(device_id).map(|e| e.clone())
    }

    pub fn list(&self) -> Vec<DeviceSnapshot> {
        let mut all: Vec<DeviceSnapshot> = self.devices.iter().map(|e| e.clone()).collect();
        all.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        all
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
