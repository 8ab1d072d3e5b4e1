use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointManager;
use crate::db::{CheckpointStore, EventStore, StoredEvent};
use crate::events::{parse_event, transform_event, RawEvent};
use crate::writer::BatchWriter;

/// Drives raw events through the pipeline: reorg check, parse,
/// transform, enqueue for batched writing.
///
/// Events that fail validation or reference nothing actionable are
/// dropped with a log line; a malformed event must never stall the
/// stream behind it.
pub struct Ingester<S, C> {
    writer: BatchWriter<S>,
    checkpoint: Arc<CheckpointManager<C>>,
}

impl<S, C> Ingester<S, C>
where
    S: EventStore + 'static,
    C: CheckpointStore + 'static,
{
    pub fn new(writer: BatchWriter<S>, checkpoint: Arc<CheckpointManager<C>>) -> Self {
        Self {
            writer,
            checkpoint,
        }
    }

    pub async fn run(
        self,
        mut events: mpsc::Receiver<RawEvent>,
        cancellation_token: CancellationToken,
    ) -> anyhow::Result<()> {
        info!("Ingester started");

        loop {
            tokio::select! {
                biased;

                _ = cancellation_token.cancelled() => {
                    info!("Ingester received cancellation signal");
                    break;
                }

                event = events.recv() => {
                    match event {
                        Some(raw) => {
                            if let Err(e) = self.process(&raw).await {
                                warn!("Failed to process event {}: {:#}", raw.event_id, e);
                            }
                        },
                        None => {
                            info!("Event channel closed; stopping ingester");
                            break;
                        },
                    }
                }
            }
        }

        // Whatever is queued must reach storage before the checkpoint
        // task shuts down behind us.
        self.writer.flush().await;
        info!("Ingester stopped");

        Ok(())
    }

    pub async fn process(&self, raw: &RawEvent) -> anyhow::Result<()> {
        // A height regression resets the checkpointed height; the event
        // itself is still ingested, since writes are idempotent and the
        // replayed canonical chain will overwrite as needed.
        self.checkpoint
            .detect_reorg(&raw.event_id, raw.block_height)
            .await?;

        let Some(parsed) = parse_event(raw) else {
            return Ok(());
        };

        let Some(record) = transform_event(&parsed, chrono::Utc::now()) else {
            return Ok(());
        };

        debug!(
            "Queueing {} event {} at height {}",
            record.kind_str(),
            parsed.event_id,
            parsed.block_height
        );

        self.writer
            .add_event(StoredEvent {
                event_id: parsed.event_id,
                timestamp: parsed.timestamp,
                block_height: parsed.block_height,
                record,
            })
            .await;

        Ok(())
    }
}
