use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Listing status lifecycle: `available` on publish, `delisted` on removal.
pub const POD_STATUS_AVAILABLE: &str = "available";
pub const POD_STATUS_DELISTED: &str = "delisted";

/// Data pod listing row (PostgreSQL).
///
/// Keyed by the blockchain-derived pod id, never by a surrogate key, so
/// replaying the same listing event is an idempotent upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPod {
    pub pod_id: String,
    pub seller: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    /// Listing price in the chain's smallest unit; arbitrary precision
    pub price: BigDecimal,
    pub status: String,
    pub total_sales: i64,
    pub rating: Option<f64>,
    pub listed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status-only delisting update for an existing pod.
///
/// Applying this to an unknown pod id is a no-op, which makes duplicate
/// delivery of delist events harmless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodDelisting {
    pub pod_id: String,
    pub delisted_at: DateTime<Utc>,
}
