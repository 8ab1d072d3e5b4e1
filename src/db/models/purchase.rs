use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PURCHASE_STATUS_PENDING: &str = "pending";
pub const PURCHASE_STATUS_COMPLETED: &str = "completed";

pub const ESCROW_STATUS_LOCKED: &str = "locked";
pub const ESCROW_STATUS_RELEASED: &str = "released";

/// Purchase request row (PostgreSQL), keyed by the on-chain purchase id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub purchase_id: String,
    pub pod_id: String,
    pub buyer: String,
    /// Amount paid in the chain's smallest unit; arbitrary precision
    pub amount: BigDecimal,
    pub status: String,
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Completion update for an existing purchase: status flip plus the
/// delivery fields, nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseCompletion {
    pub purchase_id: String,
    pub delivery_hash: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Escrow release update, addressed by the associated purchase id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowRelease {
    pub purchase_id: String,
    pub tx_hash: Option<String>,
    pub released_at: DateTime<Utc>,
}
