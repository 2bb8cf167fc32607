//! Transport seam between the engine and the pub/sub channel.
//!
//! The engine only ever sees [`CommandTransport`] for outbound publishes
//! and a stream of [`RawInbound`] messages; the MQTT client behind it is
//! swappable, which is how the integration tests script the broker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not connected: {0}")]
    NotConnected(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("connection failed: {0}")]
    Connection(String),
}

/// An inbound publish as delivered by the transport, before
/// classification. Delivery is at-least-once and may be reordered or
/// duplicated.
#[derive(Debug, Clone)]
pub struct RawInbound {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl RawInbound {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

/// Outbound half of the pub/sub channel.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Publish a payload. Errors here are synchronous publish failures;
    /// a successful return means handed to the transport, not delivered.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}

/// MQTT-style topic filter match supporting `+` (one level) and `#`
/// (trailing multi-level).
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_parts = pattern.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (pattern_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(p), Some(t)) if p == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("fleet/+/evt/+", "fleet/r1/evt/ack"));
        assert!(topic_matches("fleet/+/evt/+", "fleet/r1/evt/state"));
        assert!(!topic_matches("fleet/+/evt/+", "fleet/r1/cmd"));
        assert!(!topic_matches("fleet/+/evt/+", "fleet/r1/evt/ack/extra"));
        assert!(topic_matches("fleet/events/client/#", "fleet/events/client/connected"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("fleet/r1/cmd", "fleet/r2/cmd"));
    }
}
