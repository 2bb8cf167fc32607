//! Timeout, retry and liveness supervisor.
//!
//! A single periodic task scans the correlation table for commands past
//! their deadline and the registry for silent devices. Running retries
//! from one task only keeps the at-most-one-outstanding-publish
//! invariant per correlation identifier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use fleetbridge_core::config::EngineConfig;
use fleetbridge_core::BridgeError;

use crate::correlation::CorrelationTable;
use crate::registry::DeviceRegistry;
use crate::transport::CommandTransport;

pub struct Supervisor {
    table: Arc<CorrelationTable>,
    registry: Arc<DeviceRegistry>,
    transport: Arc<dyn CommandTransport>,
    config: EngineConfig,
}

impl Supervisor {
    pub fn new(
        table: Arc<CorrelationTable>,
        registry: Arc<DeviceRegistry>,
        transport: Arc<dyn CommandTransport>,
        config: EngineConfig,
    ) -> Self {
        Self {
            table,
            registry,
            transport,
            config,
        }
    }

    /// Periodic sweep loop; stops when the running flag drops.
    pub async fn run(self: Arc<Self>, running: Arc<AtomicBool>) {
        info!(
            interval_ms = self.config.sweep_interval_ms,
            "timeout supervisor started"
        );
        let mut ticker = interval(self.config.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while running.load(Ordering::SeqCst) {
            ticker.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }
            self.sweep(Utc::now()).await;
        }
        info!("timeout supervisor stopped");
    }

    /// One pass over expired commands and silent devices.
    pub async fn sweep(&self, now: DateTime<Utc>) {
        for (correlation_id, attempt) in self.table.expired(now) {
            let retries_used = attempt.saturating_sub(1);
            if retries_used < self.config.max_retries {
                self.retry(&correlation_id, now).await;
            } else {
                self.expire(&correlation_id, attempt);
            }
        }

        self.registry.sweep_liveness(
            now,
            chrono::Duration::milliseconds(self.config.stale_after_ms as i64),
            chrono::Duration::milliseconds(self.config.offline_after_ms as i64),
        );
    }

    /// Republish under the same correlation identifier so a late reply
    /// to any earlier attempt still resolves the command. The deadline is
    /// extended first; a failed republish therefore waits for the next
    /// sweep instead of tight-looping.
    async fn retry(&self, correlation_id: &str, now: DateTime<Utc>) {
        let Some(publication) = self.table.prepare_retry(correlation_id, now) else {
            // Resolved between the scan and now.
            return;
        };
        debug!(
            correlation_id,
            attempt = publication.attempt,
            "retrying expired command"
        );
        if let Err(e) = self
            .transport
            .publish(&publication.topic, publication.wire_payload.as_bytes())
            .await
        {
            warn!(correlation_id, %e, "retry publish failed, will retry next sweep");
        }
    }

    fn expire(&self, correlation_id: &str, attempts: u32) {
        let resolution = Err(BridgeError::Timeout {
            correlation_id: correlation_id.to_string(),
            attempts,
        });
        match self.table.resolve(correlation_id, resolution) {
            Ok(true) => debug!(correlation_id, attempts, "command expired"),
            Ok(false) => debug!(correlation_id, "command resolved before expiry"),
            Err(e) => error!(correlation_id, %e, "resolution invariant violated"),
        }
    }
}
