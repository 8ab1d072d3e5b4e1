use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use log::{info, warn};
use moka::future::Cache;

use crate::db::models::Checkpoint;
use crate::db::CheckpointStore;

/// Cache key for the singleton checkpoint
const CACHE_KEY: &str = "checkpoint";

/// Single authoritative read/write path for the ingestion position.
///
/// Two tiers: a moka in-process cache with a fixed TTL in front of the
/// durable store. The cache only ever holds a value that was written to
/// it alongside a durable write attempt, but a failed `save` can leave
/// the tiers inconsistent; callers must treat a failed `save` as
/// "position not guaranteed advanced".
///
/// A single ingester task drives all mutations; this type does not
/// arbitrate concurrent writers.
pub struct CheckpointManager<S> {
    store: Arc<S>,
    cache: Cache<&'static str, Checkpoint>,
}

impl<S: CheckpointStore> CheckpointManager<S> {
    pub fn new(store: Arc<S>, cache_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(cache_ttl)
            .build();

        Self {
            store,
            cache,
        }
    }

    /// Return the current checkpoint.
    ///
    /// Order of preference: fresh cache entry, then durable store (which
    /// repopulates the cache), then first-run initialization. The
    /// initialization branch persists a zero-valued checkpoint before
    /// returning it; a durable failure there is fatal since there is no
    /// safe position to fall back to.
    pub async fn load(&self) -> anyhow::Result<Checkpoint> {
        if let Some(checkpoint) = self.cache.get(CACHE_KEY).await {
            return Ok(checkpoint);
        }

        if let Some(checkpoint) = self.store.get_checkpoint().await? {
            self.cache.insert(CACHE_KEY, checkpoint.clone()).await;
            return Ok(checkpoint);
        }

        let checkpoint = Checkpoint::initial();
        self.store
            .set_checkpoint(&checkpoint)
            .await
            .context("Failed to persist initial checkpoint")?;
        self.cache.insert(CACHE_KEY, checkpoint.clone()).await;

        info!("Initialized zero-valued ingestion checkpoint");
        Ok(checkpoint)
    }

    /// Write the checkpoint to cache and durable store, in that order.
    ///
    /// A durable-store failure propagates even though the cache already
    /// holds the new value.
    pub async fn save(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        self.cache.insert(CACHE_KEY, checkpoint.clone()).await;
        self.store
            .set_checkpoint(checkpoint)
            .await
            .context("Failed to persist checkpoint")?;
        Ok(())
    }

    /// Read-modify-write advancement after an event commits.
    pub async fn update(
        &self,
        event_id: &str,
        timestamp: i64,
        block_height: u64,
    ) -> anyhow::Result<Checkpoint> {
        let mut checkpoint = self.load().await?;
        checkpoint.last_event_id = Some(event_id.to_string());
        checkpoint.last_timestamp = timestamp;
        checkpoint.processed_count += 1;
        checkpoint.last_block_height = block_height;
        self.save(&checkpoint).await?;
        Ok(checkpoint)
    }

    /// Declare a reorg when the observed block height regresses below the
    /// checkpointed height, resetting the stored height to the observed
    /// one. Height regression is the only signal checked; same-height
    /// forks are not detectable here.
    pub async fn detect_reorg(
        &self,
        event_id: &str,
        block_height: u64,
    ) -> anyhow::Result<bool> {
        let mut checkpoint = self.load().await?;

        if block_height < checkpoint.last_block_height {
            warn!(
                "Chain reorg detected at event {}: height {} < checkpointed {}; resetting",
                event_id, block_height, checkpoint.last_block_height
            );
            checkpoint.last_block_height = block_height;
            self.save(&checkpoint).await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Seconds since the checkpoint last advanced, floored to whole seconds.
    pub async fn processing_lag(&self) -> anyhow::Result<i64> {
        let checkpoint = self.load().await?;
        let lag_ms = Utc::now().timestamp_millis() - checkpoint.last_timestamp;
        Ok((lag_ms / 1000).max(0))
    }

    /// Reinitialize to a zero-valued checkpoint. Recovery/testing only.
    pub async fn reset(&self) -> anyhow::Result<()> {
        let checkpoint = Checkpoint::initial();
        self.save(&checkpoint).await?;
        warn!("Ingestion checkpoint was reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;

    /// In-memory checkpoint store counting durable reads and able to
    /// fail writes on demand.
    #[derive(Default)]
    struct MemoryCheckpointStore {
        inner: Mutex<Option<Checkpoint>>,
        reads: AtomicUsize,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl CheckpointStore for MemoryCheckpointStore {
        async fn get_checkpoint(&self) -> anyhow::Result<Option<Checkpoint>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.inner.lock().await.clone())
        }

        async fn set_checkpoint(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                anyhow::bail!("durable store unavailable");
            }
            *self.inner.lock().await = Some(checkpoint.clone());
            Ok(())
        }
    }

    fn manager(store: Arc<MemoryCheckpointStore>) -> CheckpointManager<MemoryCheckpointStore> {
        CheckpointManager::new(store, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_first_load_initializes_and_persists() {
        let store = Arc::new(MemoryCheckpointStore::default());
        let mgr = manager(store.clone());

        let cp = mgr.load().await.unwrap();
        assert_eq!(cp.processed_count, 0);
        assert!(store.inner.lock().await.is_some());
    }

    #[tokio::test]
    async fn test_initialize_failure_is_fatal() {
        let store = Arc::new(MemoryCheckpointStore::default());
        store.fail_writes.store(true, Ordering::SeqCst);
        let mgr = manager(store);

        assert!(mgr.load().await.is_err());
    }

    #[tokio::test]
    async fn test_cold_start_reads_durable_then_hits_cache() {
        let store = Arc::new(MemoryCheckpointStore::default());
        let existing = Checkpoint {
            last_event_id: Some("evt-9".to_string()),
            last_timestamp: 1_700_000_000_000,
            processed_count: 9,
            last_block_height: 500,
        };
        *store.inner.lock().await = Some(existing.clone());

        let mgr = manager(store.clone());

        let first = mgr.load().await.unwrap();
        assert_eq!(first, existing);
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);

        // Second load must be served from the cache
        let second = mgr.load().await.unwrap();
        assert_eq!(second, existing);
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_update_advances_monotonically() {
        let store = Arc::new(MemoryCheckpointStore::default());
        let mgr = manager(store);

        let cp1 = mgr.update("evt-1", 1_000, 10).await.unwrap();
        let cp2 = mgr.update("evt-2", 2_000, 10).await.unwrap();
        let cp3 = mgr.update("evt-3", 3_000, 12).await.unwrap();

        assert_eq!(cp1.processed_count, 1);
        assert_eq!(cp2.processed_count, 2);
        assert_eq!(cp3.processed_count, 3);
        assert!(cp2.last_block_height >= cp1.last_block_height);
        assert!(cp3.last_block_height >= cp2.last_block_height);
        assert_eq!(cp3.last_event_id.as_deref(), Some("evt-3"));
    }

    #[tokio::test]
    async fn test_reorg_detected_on_height_regression() {
        let store = Arc::new(MemoryCheckpointStore::default());
        let mgr = manager(store.clone());

        mgr.update("evt-1", 1_000, 100).await.unwrap();

        let reorged = mgr.detect_reorg("evt-2", 80).await.unwrap();
        assert!(reorged);
        assert_eq!(mgr.load().await.unwrap().last_block_height, 80);
        assert_eq!(
            store.inner.lock().await.as_ref().unwrap().last_block_height,
            80
        );
    }

    #[tokio::test]
    async fn test_no_reorg_on_advancing_height() {
        let store = Arc::new(MemoryCheckpointStore::default());
        let mgr = manager(store);

        mgr.update("evt-1", 1_000, 100).await.unwrap();

        let reorged = mgr.detect_reorg("evt-2", 120).await.unwrap();
        assert!(!reorged);
        assert_eq!(mgr.load().await.unwrap().last_block_height, 100);
    }

    #[tokio::test]
    async fn test_save_failure_propagates() {
        let store = Arc::new(MemoryCheckpointStore::default());
        let mgr = manager(store.clone());

        mgr.load().await.unwrap();
        store.fail_writes.store(true, Ordering::SeqCst);

        assert!(mgr.update("evt-1", 1_000, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_processing_lag() {
        let store = Arc::new(MemoryCheckpointStore::default());
        let mgr = manager(store);

        let stale = Checkpoint {
            last_event_id: Some("evt-1".to_string()),
            last_timestamp: Utc::now().timestamp_millis() - 5_000,
            processed_count: 1,
            last_block_height: 1,
        };
        mgr.save(&stale).await.unwrap();

        let lag = mgr.processing_lag().await.unwrap();
        assert!(lag >= 5);
    }

    #[tokio::test]
    async fn test_reset_zeroes_checkpoint() {
        let store = Arc::new(MemoryCheckpointStore::default());
        let mgr = manager(store);

        mgr.update("evt-1", 1_000, 10).await.unwrap();
        mgr.reset().await.unwrap();

        let cp = mgr.load().await.unwrap();
        assert_eq!(cp.processed_count, 0);
        assert!(cp.last_event_id.is_none());
    }
}
