use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Indexer ingestion progress checkpoint (PostgreSQL + cache tier).
///
/// Tracks the last durably processed marketplace event so the pipeline
/// can resume after restarts without missing or duplicating data. The
/// block height is the sole input to reorg detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Id of the most recently committed event; `None` until first commit
    pub last_event_id: Option<String>,
    /// Wall-clock time of the last update (epoch milliseconds)
    pub last_timestamp: i64,
    /// Monotonically non-decreasing count of committed events
    pub processed_count: u64,
    /// Block height of the last committed event
    pub last_block_height: u64,
}

impl Checkpoint {
    /// Zero-valued checkpoint for a first run, stamped with the current time.
    pub fn initial() -> Self {
        Self {
            last_event_id: None,
            last_timestamp: Utc::now().timestamp_millis(),
            processed_count: 0,
            last_block_height: 0,
        }
    }
}
