//! rumqttc-backed transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use fleetbridge_core::config::MqttConfig;

use super::{topic_matches, CommandTransport, RawInbound, TransportError};

const INBOUND_CHANNEL_CAPACITY: usize = 1024;
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// MQTT client wrapper. Owns the broker session and forwards every
/// inbound publish on the subscribed filters to an mpsc channel; the
/// matcher task is the sole consumer, which keeps per-message processing
/// sequential.
pub struct MqttTransport {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Connect to the broker, subscribe to the event filters and spawn
    /// the event-loop poll task. Returns the transport plus the inbound
    /// message receiver.
    pub async fn connect(
        config: &MqttConfig,
    ) -> Result<(Self, mpsc::Receiver<RawInbound>), TransportError> {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("fleetbridge-{}", uuid::Uuid::new_v4()));
        let mut options = MqttOptions::new(client_id, &config.broker, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 10);

        let filters = [
            format!("{}/+/evt/+", config.topic_prefix),
            format!("{}/events/client/#", config.topic_prefix),
        ];
        for filter in &filters {
            client
                .subscribe(filter, QoS::AtLeastOnce)
                .await
                .map_err(|e| TransportError::Subscribe(format!("{filter}: {e}")))?;
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        let connected_flag = connected.clone();
        let running_flag = running.clone();
        let broker_addr = config.full_broker_addr();

        tokio::spawn(async move {
            let mut error_count = 0u32;

            while running_flag.load(Ordering::SeqCst) {
                match eventloop.poll().await {
                    Ok(event) => {
                        error_count = 0;
                        match event {
                            Event::Incoming(Packet::ConnAck(_)) => {
                                connected_flag.store(true, Ordering::SeqCst);
                                info!(broker = %broker_addr, "mqtt connected");
                            }
                            Event::Incoming(Packet::Publish(publish)) => {
                                if !filters.iter().any(|f| topic_matches(f, &publish.topic)) {
                                    debug!(
                                        topic = %publish.topic,
                                        "publish outside subscribed filters, ignoring"
                                    );
                                    continue;
                                }
                                let inbound = RawInbound {
                                    topic: publish.topic.clone(),
                                    payload: publish.payload.to_vec(),
                                    received_at: Utc::now(),
                                };
                                if inbound_tx.try_send(inbound).is_err() {
                                    warn!(
                                        topic = %publish.topic,
                                        "inbound channel full, dropping message"
                                    );
                                }
                            }
                            Event::Incoming(Packet::Disconnect) => {
                                connected_flag.store(false, Ordering::SeqCst);
                                warn!(broker = %broker_addr, "mqtt disconnected by broker");
                            }
                            _ => {}
                        }
                    }
                    Err(e) => {
                        connected_flag.store(false, Ordering::SeqCst);
                        error_count += 1;
                        if error_count >= MAX_CONSECUTIVE_ERRORS {
                            error!(
                                broker = %broker_addr,
                                "mqtt error count reached {MAX_CONSECUTIVE_ERRORS}, stopping: {e}"
                            );
                            break;
                        }
                        warn!(
                            broker = %broker_addr,
                            "mqtt error ({error_count}/{MAX_CONSECUTIVE_ERRORS}): {e}"
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }

            connected_flag.store(false, Ordering::SeqCst);
            debug!(broker = %broker_addr, "mqtt event loop stopped");
        });

        Ok((
            Self {
                client,
                connected,
                running,
            },
            inbound_rx,
        ))
    }

    /// Stop the event loop and close the broker session.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.client.disconnect().await {
            debug!("mqtt disconnect: {e}");
        }
    }
}

#[async_trait]
impl CommandTransport for MqttTransport {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected(topic.to_string()));
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish(format!("{topic}: {e}")))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
