use async_trait::async_trait;

pub mod models;
pub mod postgres;

pub use postgres::PostgresClient;

use models::{Checkpoint, Record};

/// A parsed, transformed event queued for the next batch flush.
///
/// Carries the checkpoint metadata (event id, timestamp, block height)
/// alongside the persistence-ready record so the monitor can advance the
/// checkpoint once the batch holding this event commits.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub event_id: String,
    /// Event timestamp, epoch milliseconds
    pub timestamp: i64,
    pub block_height: u64,
    pub record: Record,
}

/// Durable sink for event batches.
///
/// The whole batch must be applied in arrival order inside one atomic
/// transaction: if any single event fails, none of the batch's effects
/// may persist. That contract is what makes the writer's
/// retry-by-requeue strategy safe.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn write_batch(&self, events: &[StoredEvent]) -> anyhow::Result<()>;
}

/// Durable store for the singleton ingestion checkpoint.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get_checkpoint(&self) -> anyhow::Result<Option<Checkpoint>>;
    async fn set_checkpoint(&self, checkpoint: &Checkpoint) -> anyhow::Result<()>;
}
