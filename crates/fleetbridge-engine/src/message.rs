//! Wire envelope and inbound message classification.
//!
//! Topic layout:
//! - `{prefix}/{device_id}/cmd`            outbound command envelope
//! - `{prefix}/{device_id}/evt/ack`        command acknowledgment
//! - `{prefix}/{device_id}/evt/result`     command result
//! - `{prefix}/{device_id}/evt/state`      unsolicited telemetry
//! - `{prefix}/events/client/connected`    broker session events
//! - `{prefix}/events/client/disconnected`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use fleetbridge_core::{CorrelationId, DeviceId};

/// Outbound command envelope published to `{prefix}/{device_id}/cmd`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub correlation_id: CorrelationId,
    pub payload: Value,
}

/// Topic a command for `device_id` is published on.
pub fn command_topic(prefix: &str, device_id: &str) -> String {
    format!("{prefix}/{device_id}/cmd")
}

#[derive(Debug, Deserialize)]
struct AckPayload {
    correlation_id: CorrelationId,
}

#[derive(Debug, Deserialize)]
struct ResultPayload {
    correlation_id: CorrelationId,
    success: bool,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatePayload {
    /// Device-clock unix millis, used for last-writer-wins ordering.
    /// Missing timestamps fall back to the server receive time.
    #[serde(default)]
    timestamp: Option<i64>,
    state: Value,
}

#[derive(Debug, Deserialize)]
struct ClientEventPayload {
    client_id: String,
}

/// A classified inbound transport message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Ack {
        device_id: DeviceId,
        correlation_id: CorrelationId,
    },
    CommandReply {
        device_id: DeviceId,
        correlation_id: CorrelationId,
        success: bool,
        payload: Option<Value>,
        error: Option<String>,
    },
    Telemetry {
        device_id: DeviceId,
        state: Value,
        /// Unix millis, device clock
        timestamp: i64,
    },
    Connection {
        client_id: String,
        online: bool,
    },
}

impl InboundMessage {
    /// Classify a raw publish by topic shape and payload. Returns `None`
    /// for topics outside the scheme or malformed payloads; both are
    /// logged and dropped, never surfaced as errors.
    pub fn parse(
        prefix: &str,
        topic: &str,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Option<Self> {
        let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();

        match parts.as_slice() {
            ["events", "client", kind @ ("connected" | "disconnected")] => {
                let event: ClientEventPayload = decode(topic, payload)?;
                Some(InboundMessage::Connection {
                    client_id: event.client_id,
                    online: *kind == "connected",
                })
            }
            [device_id, "evt", "ack"] if !device_id.is_empty() => {
                let ack: AckPayload = decode(topic, payload)?;
                Some(InboundMessage::Ack {
                    device_id: (*device_id).to_string(),
                    correlation_id: ack.correlation_id,
                })
            }
            [device_id, "evt", "result"] if !device_id.is_empty() => {
                let result: ResultPayload = decode(topic, payload)?;
                Some(InboundMessage::CommandReply {
                    device_id: (*device_id).to_string(),
                    correlation_id: result.correlation_id,
                    success: result.success,
                    payload: result.payload,
                    error: result.error,
                })
            }
            [device_id, "evt", "state"] if !device_id.is_empty() => {
                let state: StatePayload = decode(topic, payload)?;
                Some(InboundMessage::Telemetry {
                    device_id: (*device_id).to_string(),
                    state: state.state,
                    timestamp: state
                        .timestamp
                        .unwrap_or_else(|| received_at.timestamp_millis()),
                })
            }
            _ => {
                debug!(topic, "ignoring publish outside the topic scheme");
                None
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(topic: &str, payload: &[u8]) -> Option<T> {
    match serde_json::from_slice(payload) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(topic, %err, "dropping malformed payload");
            None
        }
    }
}
