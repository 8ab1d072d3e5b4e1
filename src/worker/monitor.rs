use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::alerts::{Alert, AlertManager};
use crate::checkpoint::CheckpointManager;
use crate::config::AlertSettings;
use crate::db::CheckpointStore;
use crate::writer::WriterSignal;

/// Minimum flush attempts in a window before the error rate is judged.
const ERROR_RATE_MIN_SAMPLES: u64 = 10;

/// Consumes batch-writer observations: advances the checkpoint for
/// every committed event and raises health alerts on lag, write
/// latency, and failure rate.
///
/// The checkpoint moves only here. An event is checkpointed strictly
/// after its batch committed, so a crash replays at most one uncommitted
/// batch, which the idempotent writes absorb.
pub struct Monitor<C> {
    checkpoint: Arc<CheckpointManager<C>>,
    alerts: Arc<AlertManager>,
    settings: AlertSettings,
    batches_ok: u64,
    batches_failed: u64,
    consecutive_failures: u32,
}

impl<C: CheckpointStore + 'static> Monitor<C> {
    pub fn new(
        checkpoint: Arc<CheckpointManager<C>>,
        alerts: Arc<AlertManager>,
        settings: AlertSettings,
    ) -> Self {
        Self {
            checkpoint,
            alerts,
            settings,
            batches_ok: 0,
            batches_failed: 0,
            consecutive_failures: 0,
        }
    }

    pub async fn run(
        mut self,
        mut signals: mpsc::Receiver<WriterSignal>,
        cancellation_token: CancellationToken,
    ) -> anyhow::Result<()> {
        info!("Monitor started");

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.settings.monitor_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancellation_token.cancelled() => {
                    info!("Monitor received cancellation signal");
                    break;
                }

                signal = signals.recv() => {
                    match signal {
                        Some(signal) => self.handle_signal(signal).await,
                        None => {
                            info!("Writer signal channel closed; stopping monitor");
                            break;
                        },
                    }
                }

                _ = interval.tick() => {
                    self.check_health().await;
                }
            }
        }

        // Drain committed batches still in flight so their events are
        // checkpointed before shutdown.
        while let Ok(signal) = signals.try_recv() {
            self.handle_signal(signal).await;
        }

        info!("Monitor stopped");
        Ok(())
    }

    pub async fn handle_signal(&mut self, signal: WriterSignal) {
        match signal {
            WriterSignal::BatchWritten { events, duration } => {
                let count = events.len();

                for event in &events {
                    if let Err(e) = self
                        .checkpoint
                        .update(&event.event_id, event.timestamp, event.block_height)
                        .await
                    {
                        warn!("Failed to advance checkpoint past {}: {:#}", event.event_id, e);
                    }
                }

                self.batches_ok += 1;
                self.consecutive_failures = 0;

                let latency_ms = duration.as_millis() as u64;
                if latency_ms > self.settings.write_latency_threshold_ms {
                    self.alerts
                        .send_alert(Alert::write_latency(
                            latency_ms,
                            self.settings.write_latency_threshold_ms,
                        ))
                        .await;
                } else {
                    self.alerts.resolve("storage-write-latency").await;
                }

                debug!("Checkpoint advanced past {} committed events", count);
            },
            WriterSignal::BatchError { error, count } => {
                self.batches_failed += 1;
                self.consecutive_failures += 1;
                warn!(
                    "Batch write of {} events failed ({} consecutive): {}",
                    count, self.consecutive_failures, error
                );

                if self.consecutive_failures >= self.settings.max_batch_retries {
                    self.alerts
                        .send_alert(
                            Alert::new(
                                "batch-write-failures",
                                crate::alerts::Severity::Critical,
                                "Batch writes failing",
                                format!(
                                    "{} consecutive batch write failures, last: {}",
                                    self.consecutive_failures, error
                                ),
                            )
                            .with_details(serde_json::json!({
                                "consecutive_failures": self.consecutive_failures,
                                "pending_events": count,
                            })),
                        )
                        .await;
                }
            },
        }
    }

    pub async fn check_health(&mut self) {
        match self.checkpoint.processing_lag().await {
            Ok(lag) => {
                if lag > self.settings.processing_lag_threshold_secs {
                    self.alerts
                        .send_alert(Alert::processing_lag(
                            lag,
                            self.settings.processing_lag_threshold_secs,
                        ))
                        .await;
                } else {
                    self.alerts.resolve("processing-lag").await;
                }
            },
            Err(e) => warn!("Failed to compute processing lag: {:#}", e),
        }

        let total = self.batches_ok + self.batches_failed;
        if total >= ERROR_RATE_MIN_SAMPLES {
            let rate = self.batches_failed as f64 / total as f64;
            if rate > self.settings.error_rate_threshold {
                self.alerts
                    .send_alert(Alert::error_rate(rate, self.settings.error_rate_threshold))
                    .await;
            } else {
                self.alerts.resolve("error-rate").await;
            }
            // Start a fresh window each interval so an old burst of
            // failures ages out of the rate.
            self.batches_ok = 0;
            self.batches_failed = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::db::models::Checkpoint;
    use crate::writer::CommittedEvent;

    #[derive(Default)]
    struct MemoryCheckpointStore {
        checkpoint: Mutex<Option<Checkpoint>>,
    }

    #[async_trait]
    impl CheckpointStore for MemoryCheckpointStore {
        async fn get_checkpoint(&self) -> anyhow::Result<Option<Checkpoint>> {
            Ok(self.checkpoint.lock().await.clone())
        }

        async fn set_checkpoint(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
            *self.checkpoint.lock().await = Some(checkpoint.clone());
            Ok(())
        }
    }

    fn monitor(settings: AlertSettings) -> (Monitor<MemoryCheckpointStore>, Arc<AlertManager>) {
        let checkpoint = Arc::new(CheckpointManager::new(
            Arc::new(MemoryCheckpointStore::default()),
            Duration::from_secs(60),
        ));
        let alerts = Arc::new(AlertManager::new(vec![]));
        (
            Monitor::new(checkpoint, alerts.clone(), settings),
            alerts,
        )
    }

    fn committed(event_id: &str, height: u64) -> CommittedEvent {
        CommittedEvent {
            event_id: event_id.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            block_height: height,
        }
    }

    #[tokio::test]
    async fn batch_written_advances_checkpoint_per_event() {
        let (mut monitor, _alerts) = monitor(AlertSettings::default());

        monitor
            .handle_signal(WriterSignal::BatchWritten {
                events: vec![committed("evt-1", 100), committed("evt-2", 101)],
                duration: Duration::from_millis(20),
            })
            .await;

        let checkpoint = monitor.checkpoint.load().await.unwrap();
        assert_eq!(checkpoint.last_event_id.as_deref(), Some("evt-2"));
        assert_eq!(checkpoint.processed_count, 2);
        assert_eq!(checkpoint.last_block_height, 101);
    }

    #[tokio::test]
    async fn slow_batch_raises_a_latency_alert() {
        let settings = AlertSettings {
            write_latency_threshold_ms: 100,
            ..AlertSettings::default()
        };
        let (mut monitor, alerts) = monitor(settings);

        monitor
            .handle_signal(WriterSignal::BatchWritten {
                events: vec![committed("evt-1", 100)],
                duration: Duration::from_millis(500),
            })
            .await;

        let active = alerts.active_alerts().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "storage-write-latency");
    }

    #[tokio::test]
    async fn fast_batch_resolves_the_latency_alert() {
        let settings = AlertSettings {
            write_latency_threshold_ms: 100,
            ..AlertSettings::default()
        };
        let (mut monitor, alerts) = monitor(settings);

        monitor
            .handle_signal(WriterSignal::BatchWritten {
                events: vec![committed("evt-1", 100)],
                duration: Duration::from_millis(500),
            })
            .await;
        monitor
            .handle_signal(WriterSignal::BatchWritten {
                events: vec![committed("evt-2", 101)],
                duration: Duration::from_millis(10),
            })
            .await;

        assert!(alerts.active_alerts().await.is_empty());
    }

    #[tokio::test]
    async fn repeated_failures_raise_a_critical_alert() {
        let settings = AlertSettings {
            max_batch_retries: 3,
            ..AlertSettings::default()
        };
        let (mut monitor, alerts) = monitor(settings);

        for _ in 0..3 {
            monitor
                .handle_signal(WriterSignal::BatchError {
                    error: "connection refused".to_string(),
                    count: 5,
                })
                .await;
        }

        let active = alerts.active_alerts().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "batch-write-failures");
    }

    #[tokio::test]
    async fn stale_checkpoint_raises_a_lag_alert() {
        let (mut monitor, alerts) = monitor(AlertSettings::default());

        // An hour behind the configured 300s threshold.
        monitor
            .checkpoint
            .update(
                "evt-1",
                chrono::Utc::now().timestamp_millis() - 3_600_000,
                100,
            )
            .await
            .unwrap();

        monitor.check_health().await;

        let active = alerts.active_alerts().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "processing-lag");
    }

    #[tokio::test]
    async fn error_rate_window_resets_after_evaluation() {
        let settings = AlertSettings {
            processing_lag_threshold_secs: i64::MAX,
            error_rate_threshold: 0.2,
            ..AlertSettings::default()
        };
        let (mut monitor, alerts) = monitor(settings);

        monitor.batches_ok = 4;
        monitor.batches_failed = 6;
        monitor.check_health().await;

        let active = alerts.active_alerts().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "error-rate");
        assert_eq!(monitor.batches_ok, 0);
        assert_eq!(monitor.batches_failed, 0);
    }
}
