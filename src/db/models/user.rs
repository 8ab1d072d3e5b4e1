use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marketplace user row (PostgreSQL).
///
/// The pipeline only ever creates placeholder rows: when an event
/// references a seller, buyer or reviewer address the store has never
/// seen, a just-in-time record is inserted so foreign keys hold. Profile
/// data is owned by the API layer, not this pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub address: String,
    pub username: Option<String>,
    pub placeholder: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn placeholder(address: String, now: DateTime<Utc>) -> Self {
        Self {
            address,
            username: None,
            placeholder: true,
            created_at: now,
            updated_at: now,
        }
    }
}
