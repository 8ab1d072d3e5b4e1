//! Redpanda (Kafka-compatible) integration.
//!
//! Two directions: the upstream chain listener publishes raw marketplace
//! events to `{prefix}.events`, consumed here and fed into the ingestion
//! channel; alerts go out on `{prefix}.alerts` with fire-and-forget
//! semantics so alert delivery can never block the pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::alerts::{Alert, AlertChannel, AlertManager};
use crate::config::RedpandaSettings;
use crate::error::IndexerError;
use crate::events::RawEvent;

const UPSTREAM_ERROR_THRESHOLD: u32 = 5;

/// Publishes alerts to a Redpanda topic.
pub struct AlertPublisher {
    producer: FutureProducer,
    topic: String,
}

impl AlertPublisher {
    /// Returns `None` if Redpanda is disabled in settings or the
    /// producer cannot be created.
    pub fn new(settings: &RedpandaSettings) -> Option<Self> {
        if !settings.enabled {
            info!("Redpanda alert publishing is disabled");
            return None;
        }

        let producer: FutureProducer = match ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("message.timeout.ms", "5000")
            .set("linger.ms", "5")
            .create()
        {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to create Redpanda producer: {}", e);
                return None;
            },
        };

        let topic = format!("{}.alerts", settings.topic_prefix);
        info!("Redpanda alert publisher initialized on topic {}", topic);

        Some(Self {
            producer,
            topic,
        })
    }
}

#[async_trait]
impl AlertChannel for AlertPublisher {
    fn name(&self) -> &str {
        "redpanda"
    }

    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        let payload = serde_json::to_string(alert)?;
        let record = FutureRecord::to(&self.topic)
            .key(&alert.id)
            .payload(&payload);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Redpanda send failed: {}", e))?;

        Ok(())
    }
}

/// Consumes raw marketplace events from Redpanda and forwards them into
/// the ingestion channel.
///
/// Undecodable messages are logged and skipped; they are the wire-level
/// equivalent of a validation failure and must not stop the stream.
pub struct EventSubscriber {
    consumer: StreamConsumer,
    topic: String,
}

impl EventSubscriber {
    pub fn new(settings: &RedpandaSettings) -> anyhow::Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| {
                anyhow::anyhow!(IndexerError::blockchain(format!(
                    "failed to create Redpanda consumer: {}",
                    e
                )))
            })?;

        let topic = format!("{}.events", settings.topic_prefix);
        consumer
            .subscribe(&[&topic])
            .map_err(|e| anyhow::anyhow!("Failed to subscribe to {}: {}", topic, e))?;

        info!("Subscribed to raw event topic {}", topic);

        Ok(Self {
            consumer,
            topic,
        })
    }

    pub async fn run(
        self,
        sender: mpsc::Sender<RawEvent>,
        alerts: Arc<AlertManager>,
        cancellation_token: CancellationToken,
    ) -> anyhow::Result<()> {
        let mut consecutive_errors = 0u32;

        loop {
            tokio::select! {
                biased;

                _ = cancellation_token.cancelled() => {
                    info!("Event subscriber received cancellation signal");
                    break;
                }

                message = self.consumer.recv() => {
                    let message = match message {
                        Ok(m) => m,
                        Err(e) => {
                            warn!("Redpanda receive error on {}: {}", self.topic, e);
                            consecutive_errors += 1;
                            if consecutive_errors >= UPSTREAM_ERROR_THRESHOLD {
                                alerts
                                    .send_alert(Alert::upstream_rpc_error(
                                        consecutive_errors,
                                        UPSTREAM_ERROR_THRESHOLD,
                                    ))
                                    .await;
                            }
                            continue;
                        },
                    };

                    if consecutive_errors > 0 {
                        alerts.resolve("upstream-rpc-error").await;
                        consecutive_errors = 0;
                    }

                    let Some(payload) = message.payload() else {
                        warn!("Empty message on {} skipped", self.topic);
                        continue;
                    };

                    match serde_json::from_slice::<RawEvent>(payload) {
                        Ok(event) => {
                            if sender.send(event).await.is_err() {
                                info!("Ingestion channel closed; stopping subscriber");
                                break;
                            }
                        },
                        Err(e) => {
                            warn!(
                                "Undecodable message on {} skipped: {}",
                                self.topic, e
                            );
                        },
                    }
                }
            }
        }

        Ok(())
    }
}
