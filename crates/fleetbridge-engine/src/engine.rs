//! Engine facade: wires the correlation table, registry, dispatcher,
//! matcher and supervisor around an injected transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use fleetbridge_core::config::EngineConfig;
use fleetbridge_core::{BridgeResult, CorrelationId, DeviceId};

use crate::command::CommandStatus;
use crate::correlation::{CommandHandle, CorrelationTable};
use crate::dispatcher::Dispatcher;
use crate::history::{CommandHistory, CommandRecord};
use crate::matcher::Matcher;
use crate::registry::{DeviceRegistry, DeviceSnapshot, StateView};
use crate::supervisor::Supervisor;
use crate::transport::{CommandTransport, RawInbound};

/// Uniform view of a command, whether still in flight or already
/// terminal.
#[derive(Debug, Clone, Serialize)]
pub struct CommandInfo {
    pub correlation_id: CorrelationId,
    pub device_id: DeviceId,
    pub status: CommandStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<CommandRecord> for CommandInfo {
    fn from(record: CommandRecord) -> Self {
        Self {
            correlation_id: record.correlation_id,
            device_id: record.device_id,
            status: record.status,
            attempts: record.attempts,
            created_at: record.created_at,
            resolved_at: Some(record.resolved_at),
            result: record.result,
            error: record.error,
        }
    }
}

pub struct Engine {
    table: Arc<CorrelationTable>,
    registry: Arc<DeviceRegistry>,
    history: Arc<CommandHistory>,
    dispatcher: Dispatcher,
    matcher: Arc<Matcher>,
    supervisor: Arc<Supervisor>,
    transport: Arc<dyn CommandTransport>,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(
        transport: Arc<dyn CommandTransport>,
        config: EngineConfig,
        topic_prefix: impl Into<String>,
    ) -> Self {
        let topic_prefix = topic_prefix.into();
        let history = Arc::new(CommandHistory::new(config.history_limit));
        let table = Arc::new(CorrelationTable::new(history.clone()));
        let registry = Arc::new(DeviceRegistry::new());
        let dispatcher = Dispatcher::new(
            table.clone(),
            transport.clone(),
            config.clone(),
            topic_prefix.clone(),
        );
        let matcher = Arc::new(Matcher::new(table.clone(), registry.clone(), topic_prefix));
        let supervisor = Arc::new(Supervisor::new(
            table.clone(),
            registry.clone(),
            transport.clone(),
            config,
        ));

        Self {
            table,
            registry,
            history,
            dispatcher,
            matcher,
            supervisor,
            transport,
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the matcher and supervisor tasks. `inbound` is the
    /// transport's message channel; the matcher is its sole consumer.
    pub fn start(&self, inbound: mpsc::Receiver<RawInbound>) {
        self.running.store(true, Ordering::SeqCst);
        let matcher_task = tokio::spawn(self.matcher.clone().run(inbound, self.running.clone()));
        let supervisor_task = tokio::spawn(self.supervisor.clone().run(self.running.clone()));
        let mut tasks = match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.push(matcher_task);
        tasks.push(supervisor_task);
        info!("engine started");
    }

    /// Stop the background tasks. In-flight commands resolve with a
    /// transport error on their handles when the engine drops.
    pub fn shutdown(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let mut tasks = match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for task in tasks.drain(..) {
            task.abort();
        }
        if was_running {
            info!("engine stopped");
        }
    }

    /// Submit a command and return its pending result handle.
    pub async fn submit_command(
        &self,
        device_id: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> BridgeResult<CommandHandle> {
        self.dispatcher.submit(device_id, payload, timeout).await
    }

    /// Last-known state of a device with staleness annotation.
    pub fn get_device_state(&self, device_id: &str) -> BridgeResult<StateView> {
        self.registry.get_state(device_id, Utc::now())
    }

    pub fn list_devices(&self) -> Vec<DeviceSnapshot> {
        self.registry.list()
    }

    /// In-flight commands followed by terminal history, newest first,
    /// optionally filtered.
    pub fn list_commands(
        &self,
        device_id: Option<&str>,
        status: Option<CommandStatus>,
        limit: usize,
    ) -> Vec<CommandInfo> {
        let in_flight = self.table.snapshot().into_iter().map(|c| CommandInfo {
            correlation_id: c.correlation_id,
            device_id: c.device_id,
            status: c.status,
            attempts: c.attempt,
            created_at: c.created_at,
            resolved_at: None,
            result: None,
            error: None,
        });
        let terminal = self
            .history
            .recent(self.history.len())
            .into_iter()
            .map(CommandInfo::from);

        in_flight
            .chain(terminal)
            .filter(|c| device_id.is_none_or(|d| c.device_id == d))
            .filter(|c| status.is_none_or(|s| c.status == s))
            .take(limit)
            .collect()
    }

    /// Command lookup across the live table and the history.
    pub fn find_command(&self, correlation_id: &str) -> Option<CommandInfo> {
        if let Some(command) = self.table.get(correlation_id) {
            return Some(CommandInfo {
                correlation_id: command.correlation_id,
                device_id: command.device_id,
                status: command.status,
                attempts: command.attempt,
                created_at: command.created_at,
                resolved_at: None,
                result: None,
                error: None,
            });
        }
        self.history.find(correlation_id).map(CommandInfo::from)
    }

    pub fn pending_count(&self) -> usize {
        self.table.pending_count()
    }

    pub fn is_transport_connected(&self) -> bool {
        self.transport.is_connected()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
