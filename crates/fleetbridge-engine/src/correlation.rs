//! Correlation table and pending result handles.
//!
//! The table owns every in-flight command and its single-resolution
//! handle. Mutation is serialized per entry by the map's shard locks;
//! no lock is ever held across an await point.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, error};

use fleetbridge_core::{BridgeError, CorrelationId, DeviceId};

use crate::command::{Command, CommandStatus, Resolution};
use crate::history::CommandHistory;

/// An in-flight command plus everything needed to retry or resolve it.
struct PendingCommand {
    command: Command,
    /// Topic the command was published on, reused verbatim on retry
    topic: String,
    /// Serialized wire envelope, republished unchanged on retry so the
    /// device sees the same correlation identifier
    wire_payload: String,
    /// Single-use resolver, taken exactly once when the entry is
    /// evicted. `None` on an evicted entry is the duplicate resolution
    /// invariant violation.
    resolver: Option<oneshot::Sender<Resolution>>,
}

/// Caller-side handle to a pending command.
///
/// Dropping the handle cancels only the caller's wait; the command keeps
/// running in the table until its own deadline/retry policy resolves it,
/// at which point the late resolution is discarded.
#[derive(Debug)]
pub struct CommandHandle {
    correlation_id: CorrelationId,
    device_id: DeviceId,
    rx: oneshot::Receiver<Resolution>,
}

impl CommandHandle {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Suspend until the command resolves or the caller's own timeout
    /// elapses. No table lock is held while suspended.
    pub async fn wait(self, caller_timeout: Duration) -> Resolution {
        match tokio::time::timeout(caller_timeout, self.rx).await {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(_closed)) => Err(BridgeError::TransportUnavailable(
                "engine stopped before the command resolved".into(),
            )),
            Err(_elapsed) => Err(BridgeError::Timeout {
                correlation_id: self.correlation_id,
                attempts: 0,
            }),
        }
    }
}

/// Data the supervisor needs to republish a command.
#[derive(Debug, Clone)]
pub struct RetryPublication {
    pub correlation_id: CorrelationId,
    pub topic: String,
    pub wire_payload: String,
    pub attempt: u32,
}

/// Shared table of in-flight commands keyed by correlation identifier.
pub struct CorrelationTable {
    pending: DashMap<CorrelationId, PendingCommand>,
    history: Arc<CommandHistory>,
}

impl CorrelationTable {
    pub fn new(history: Arc<CommandHistory>) -> Self {
        Self {
            pending: DashMap::new(),
            history,
        }
    }

    /// Whether a correlation identifier is currently live. Used by the
    /// dispatcher's collision check so an id is never reused while its
    /// command is non-terminal.
    pub fn contains(&self, correlation_id: &str) -> bool {
        self.pending.contains_key(correlation_id)
    }

    /// Number of in-flight commands.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Snapshot of an in-flight command, if still live.
    pub fn get(&self, correlation_id: &str) -> Option<Command> {
        self.pending.get(correlation_id).map(|e| e.command.clone())
    }

    /// Snapshot of every in-flight command, newest first.
    pub fn snapshot(&self) -> Vec<Command> {
        let mut commands: Vec<Command> = self.pending.iter().map(|e| e.command.clone()).collect();
        commands.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        commands
    }

    /// Register a new command and hand back its pending result handle.
    pub fn insert(&self, command: Command, topic: String, wire_payload: String) -> CommandHandle {
        let (tx, rx) = oneshot::channel();
        let handle = CommandHandle {
            correlation_id: command.correlation_id.clone(),
            device_id: command.device_id.clone(),
            rx,
        };
        self.pending.insert(
            command.correlation_id.clone(),
            PendingCommand {
                command,
                topic,
                wire_payload,
                resolver: Some(tx),
            },
        );
        handle
    }

    /// Transition `Pending -> Acknowledged`. Any other current status
    /// makes this an idempotent no-op (duplicate ack, ack after result).
    /// Returns whether the entry was found.
    pub fn acknowledge(&self, correlation_id: &str) -> bool {
        match self.pending.get_mut(correlation_id) {
            Some(mut entry) => {
                if entry.command.status == CommandStatus::Pending {
                    entry.command.status = CommandStatus::Acknowledged;
                }
                true
            }
            None => false,
        }
    }

    /// Resolve a command exactly once: evict the entry atomically, mark
    /// it terminal, record history and deliver the resolution to the
    /// waiting handle.
    ///
    /// Returns `Ok(false)` when the identifier is not in the table,
    /// which is the normal late/duplicate delivery path, handled by
    /// logging at the call site. Concurrent resolvers (a device result
    /// racing a deadline expiry) race on the removal itself, so the
    /// loser takes that path. An evicted entry whose resolver is
    /// already gone is the `DuplicateResolution` invariant violation
    /// and fails loudly.
    pub fn resolve(
        &self,
        correlation_id: &str,
        resolution: Resolution,
    ) -> Result<bool, BridgeError> {
        let Some((_, mut entry)) = self.pending.remove(correlation_id) else {
            return Ok(false);
        };
        let Some(tx) = entry.resolver.take() else {
            error!(
                correlation_id,
                "evicted entry had no resolver left; this is a bug"
            );
            debug_assert!(false, "duplicate resolution for {correlation_id}");
            return Err(BridgeError::DuplicateResolution(correlation_id.to_string()));
        };
        entry.command.status = terminal_status(&resolution);
        self.history.record(&entry.command, &resolution);

        if tx.send(resolution).is_err() {
            // Caller gave up waiting; the outcome is already in history.
            debug!(correlation_id, "caller gone, resolution discarded");
        }
        Ok(true)
    }

    /// Collect commands past their deadline that are still awaiting a
    /// reply. Supervisor policy decides between retry and expiry.
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<(CorrelationId, u32)> {
        self.pending
            .iter()
            .filter(|e| {
                !e.command.status.is_terminal() && e.command.is_expired(now)
            })
            .map(|e| (e.command.correlation_id.clone(), e.command.attempt))
            .collect()
    }

    /// Record a retry on an entry and return what the supervisor must
    /// republish. `None` if the entry resolved in the meantime.
    pub fn prepare_retry(&self, correlation_id: &str, now: DateTime<Utc>) -> Option<RetryPublication> {
        let mut entry = self.pending.get_mut(correlation_id)?;
        entry.command.record_retry(now);
        Some(RetryPublication {
            correlation_id: entry.command.correlation_id.clone(),
            topic: entry.topic.clone(),
            wire_payload: entry.wire_payload.clone(),
            attempt: entry.command.attempt,
        })
    }

}

/// Terminal status implied by a resolution.
fn terminal_status(resolution: &Resolution) -> CommandStatus {
    match resolution {
        Ok(outcome) => outcome.status,
        Err(BridgeError::Timeout { .. }) => CommandStatus::Expired,
        Err(_) => CommandStatus::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutcome;

    fn table() -> CorrelationTable {
        CorrelationTable::new(Arc::new(CommandHistory::new(16)))
    }

    fn command(id: &str) -> Command {
        Command::new(
            id.into(),
            "r1".into(),
            serde_json::json!({"op": "noop"}),
            chrono::Duration::seconds(2),
        )
    }

    #[tokio::test]
    async fn test_insert_and_resolve_once() {
        let table = table();
        let handle = table.insert(command("c1"), "t".into(), "{}".into());
        assert!(table.contains("c1"));

        let outcome = CommandOutcome::completed("c1".into(), "r1".into(), None);
        assert!(table.resolve("c1", Ok(outcome)).unwrap());
        assert!(!table.contains("c1"));

        let resolution = handle.wait(Duration::from_millis(100)).await.unwrap();
        assert_eq!(resolution.status, CommandStatus::Completed);
    }

    #[tokio::test]
    async fn test_late_resolution_is_not_an_error() {
        let table = table();
        let handle = table.insert(command("c1"), "t".into(), "{}".into());
        let outcome = CommandOutcome::completed("c1".into(), "r1".into(), None);
        assert!(table.resolve("c1", Ok(outcome.clone())).unwrap());

        // Second arrival for the same id: entry already evicted.
        assert!(!table.resolve("c1", Ok(outcome)).unwrap());
        drop(handle);
    }

    #[tokio::test]
    async fn test_caller_cancellation_discards_resolution() {
        let table = table();
        let handle = table.insert(command("c1"), "t".into(), "{}".into());
        drop(handle);

        // Resolving into a dropped receiver is fine; entry evicts normally.
        let outcome = CommandOutcome::completed("c1".into(), "r1".into(), None);
        assert!(table.resolve("c1", Ok(outcome)).unwrap());
        assert_eq!(table.pending_count(), 0);
    }

    #[test]
    fn test_concurrent_result_and_expiry_resolve_once() {
        let table = table();
        for i in 0..100 {
            let id = format!("c{i}");
            let _handle = table.insert(command(&id), "t".into(), "{}".into());

            let barrier = std::sync::Barrier::new(2);
            let (result, expiry) = std::thread::scope(|s| {
                let result = s.spawn(|| {
                    barrier.wait();
                    let outcome = CommandOutcome::completed(id.clone(), "r1".into(), None);
                    table.resolve(&id, Ok(outcome))
                });
                let expiry = s.spawn(|| {
                    barrier.wait();
                    let timeout = BridgeError::Timeout {
                        correlation_id: id.clone(),
                        attempts: 1,
                    };
                    table.resolve(&id, Err(timeout))
                });
                (result.join().unwrap(), expiry.join().unwrap())
            });

            // The loser sees not-found, never an invariant violation.
            let wins = [result.unwrap(), expiry.unwrap()]
                .iter()
                .filter(|resolved| **resolved)
                .count();
            assert_eq!(wins, 1);
            assert!(!table.contains(&id));
        }
    }

    #[tokio::test]
    async fn test_ack_is_idempotent() {
        let table = table();
        let _handle = table.insert(command("c1"), "t".into(), "{}".into());
        assert!(table.acknowledge("c1"));
        assert!(table.acknowledge("c1"));
        assert_eq!(table.get("c1").unwrap().status, CommandStatus::Acknowledged);
        assert!(!table.acknowledge("missing"));
    }

    #[tokio::test]
    async fn test_expired_scan() {
        let table = table();
        let _h1 = table.insert(command("c1"), "t".into(), "{}".into());
        let past = Utc::now() + chrono::Duration::seconds(10);
        let expired = table.expired(past);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "c1");
        assert!(table.expired(Utc::now()).is_empty());
    }

    #[tokio::test]
    async fn test_prepare_retry_extends_and_counts() {
        let table = table();
        let _h = table.insert(command("c1"), "fleet/r1/cmd".into(), "{\"x\":1}".into());
        let pub1 = table.prepare_retry("c1", Utc::now()).unwrap();
        assert_eq!(pub1.attempt, 2);
        assert_eq!(pub1.topic, "fleet/r1/cmd");
        assert_eq!(pub1.wire_payload, "{\"x\":1}");
        assert!(table.prepare_retry("gone", Utc::now()).is_none());
    }
}
