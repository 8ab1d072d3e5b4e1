use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Review row (PostgreSQL), keyed by (pod, reviewer).
///
/// A reviewer re-submitting for the same pod overwrites their previous
/// review instead of creating a second row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub pod_id: String,
    pub reviewer: String,
    /// 1 through 5, validated at parse time
    pub rating: i16,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
