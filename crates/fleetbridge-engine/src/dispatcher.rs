//! Command dispatcher: registers a command, publishes it, returns the
//! pending result handle without blocking the caller.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use fleetbridge_core::config::EngineConfig;
use fleetbridge_core::{BridgeError, BridgeResult, CorrelationId};

use crate::command::Command;
use crate::correlation::{CommandHandle, CorrelationTable};
use crate::message::{command_topic, CommandEnvelope};
use crate::transport::CommandTransport;

pub struct Dispatcher {
    table: Arc<CorrelationTable>,
    transport: Arc<dyn CommandTransport>,
    config: EngineConfig,
    topic_prefix: String,
}

impl Dispatcher {
    pub fn new(
        table: Arc<CorrelationTable>,
        transport: Arc<dyn CommandTransport>,
        config: EngineConfig,
        topic_prefix: impl Into<String>,
    ) -> Self {
        Self {
            table,
            transport,
            config,
            topic_prefix: topic_prefix.into(),
        }
    }

    /// Submit a command for `device_id`. The entry is registered before
    /// the publish so a fast reply can never miss it; a synchronous
    /// publish failure resolves the handle with `TransportUnavailable`
    /// and leaves nothing in the table.
    pub async fn submit(
        &self,
        device_id: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> BridgeResult<CommandHandle> {
        if device_id.trim().is_empty() {
            return Err(BridgeError::InvalidRequest("empty device id".into()));
        }

        let timeout = timeout.unwrap_or_else(|| self.config.default_timeout());
        if timeout < self.config.min_timeout() || timeout > self.config.max_timeout() {
            return Err(BridgeError::InvalidRequest(format!(
                "timeout {}ms outside allowed range {}..={}ms",
                timeout.as_millis(),
                self.config.min_timeout_ms,
                self.config.max_timeout_ms
            )));
        }
        let timeout = chrono::Duration::from_std(timeout)
            .map_err(|_| BridgeError::InvalidRequest("timeout out of range".into()))?;

        let correlation_id = self.fresh_correlation_id();
        let envelope = CommandEnvelope {
            correlation_id: correlation_id.clone(),
            payload: payload.clone(),
        };
        let wire_payload = serde_json::to_string(&envelope)
            .map_err(|e| BridgeError::InvalidRequest(format!("unserializable payload: {e}")))?;
        let topic = command_topic(&self.topic_prefix, device_id);

        let command = Command::new(correlation_id.clone(), device_id.to_string(), payload, timeout);
        let handle = self
            .table
            .insert(command, topic.clone(), wire_payload.clone());

        debug!(correlation_id, device_id, topic, "publishing command");
        if let Err(e) = self.transport.publish(&topic, wire_payload.as_bytes()).await {
            warn!(correlation_id, device_id, %e, "synchronous publish failure");
            self.table.resolve(
                &correlation_id,
                Err(BridgeError::TransportUnavailable(e.to_string())),
            )?;
        }

        Ok(handle)
    }

    /// Fresh id guaranteed not to collide with any live entry.
    fn fresh_correlation_id(&self) -> CorrelationId {
        loop {
            let id = Uuid::new_v4().to_string();
            if !self.table.contains(&id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandStatus;
    use crate::history::CommandHistory;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Transport that records publishes and can be told to fail.
    struct RecordingTransport {
        published: Mutex<Vec<(String, Vec<u8>)>>,
        fail: bool,
    }

    impl RecordingTransport {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                published: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl CommandTransport for RecordingTransport {
        async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::NotConnected(topic.to_string()));
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_vec()));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            !self.fail
        }
    }

    fn dispatcher(transport: Arc<RecordingTransport>) -> (Dispatcher, Arc<CorrelationTable>) {
        let table = Arc::new(CorrelationTable::new(Arc::new(CommandHistory::new(16))));
        let dispatcher = Dispatcher::new(
            table.clone(),
            transport,
            EngineConfig::default(),
            "fleet",
        );
        (dispatcher, table)
    }

    #[tokio::test]
    async fn test_submit_registers_then_publishes() {
        let transport = RecordingTransport::new(false);
        let (dispatcher, table) = dispatcher(transport.clone());

        let handle = dispatcher
            .submit("r1", serde_json::json!({"op": "dock"}), None)
            .await
            .unwrap();

        assert!(table.contains(handle.correlation_id()));
        let published = transport.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "fleet/r1/cmd");
        let envelope: CommandEnvelope = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(envelope.correlation_id, handle.correlation_id());
        assert_eq!(envelope.payload, serde_json::json!({"op": "dock"}));
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected() {
        let (dispatcher, _) = dispatcher(RecordingTransport::new(false));
        let err = dispatcher
            .submit("  ", serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidRequest(_)));

        let err = dispatcher
            .submit("r1", serde_json::json!({}), Some(Duration::from_millis(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_publish_failure_leaves_table_clean() {
        let (dispatcher, table) = dispatcher(RecordingTransport::new(true));

        let handle = dispatcher
            .submit("r1", serde_json::json!({}), None)
            .await
            .unwrap();
        assert_eq!(table.pending_count(), 0);

        let err = handle.wait(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, BridgeError::TransportUnavailable(_)));
    }

    #[tokio::test]
    async fn test_failed_publish_recorded_in_history() {
        let history = Arc::new(CommandHistory::new(8));
        let table = Arc::new(CorrelationTable::new(history.clone()));
        let dispatcher = Dispatcher::new(
            table,
            RecordingTransport::new(true),
            EngineConfig::default(),
            "fleet",
        );

        let handle = dispatcher
            .submit("r1", serde_json::json!({}), None)
            .await
            .unwrap();
        let record = history.find(handle.correlation_id()).unwrap();
        assert_eq!(record.status, CommandStatus::Failed);
    }
}
