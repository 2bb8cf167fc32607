//! Response matcher: routes inbound transport messages to the
//! correlation table and the device registry.
//!
//! A single consumer task drains the transport's inbound channel, which
//! keeps processing sequential per correlation identifier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::command::CommandOutcome;
use crate::correlation::CorrelationTable;
use crate::message::InboundMessage;
use crate::registry::DeviceRegistry;
use crate::transport::RawInbound;

pub struct Matcher {
    table: Arc<CorrelationTable>,
    registry: Arc<DeviceRegistry>,
    topic_prefix: String,
}

impl Matcher {
    pub fn new(
        table: Arc<CorrelationTable>,
        registry: Arc<DeviceRegistry>,
        topic_prefix: impl Into<String>,
    ) -> Self {
        Self {
            table,
            registry,
            topic_prefix: topic_prefix.into(),
        }
    }

    /// Drain the inbound channel until the transport closes it or the
    /// running flag drops.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<RawInbound>, running: Arc<AtomicBool>) {
        info!("response matcher started");
        while running.load(Ordering::SeqCst) {
            match inbound.recv().await {
                Some(raw) => self.on_raw(raw),
                None => break,
            }
        }
        info!("response matcher stopped");
    }

    /// Classify and apply a single raw publish.
    pub fn on_raw(&self, raw: RawInbound) {
        let Some(message) =
            InboundMessage::parse(&self.topic_prefix, &raw.topic, &raw.payload, raw.received_at)
        else {
            return;
        };
        self.on_message(message, raw.received_at);
    }

    /// Apply a classified message. Unmatched correlation identifiers are
    /// expected on an at-least-once transport and are dropped quietly;
    /// every device-origin message also refreshes the registry.
    pub fn on_message(&self, message: InboundMessage, received_at: DateTime<Utc>) {
        match message {
            InboundMessage::Ack {
                device_id,
                correlation_id,
            } => {
                self.registry.touch(&device_id, received_at);
                if self.table.acknowledge(&correlation_id) {
                    debug!(correlation_id, device_id, "command acknowledged");
                } else {
                    debug!(correlation_id, "dropping ack for unknown command");
                }
            }
            InboundMessage::CommandReply {
                device_id,
                correlation_id,
                success,
                payload,
                error,
            } => {
                self.registry.touch(&device_id, received_at);
                let outcome = if success {
                    CommandOutcome::completed(correlation_id.clone(), device_id, payload)
                } else {
                    CommandOutcome::failed(
                        correlation_id.clone(),
                        device_id,
                        error.unwrap_or_else(|| "device reported failure".into()),
                    )
                };
                match self.table.resolve(&correlation_id, Ok(outcome)) {
                    Ok(true) => debug!(correlation_id, "command resolved by device reply"),
                    Ok(false) => debug!(correlation_id, "dropping late or duplicate reply"),
                    Err(e) => error!(correlation_id, %e, "resolution invariant violated"),
                }
            }
            InboundMessage::Telemetry {
                device_id,
                state,
                timestamp,
            } => {
                self.registry
                    .apply_telemetry(&device_id, state, timestamp, received_at);
            }
            InboundMessage::Connection { client_id, online } => {
                if online {
                    self.registry.mark_connected(&client_id, received_at);
                } else {
                    self.registry.mark_disconnected(&client_id);
                }
            }
        }
    }
}
