use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw marketplace event as delivered by the upstream chain listener.
///
/// `data` stays opaque until the per-kind parser validates it; the
/// envelope fields are what checkpointing and reorg detection need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub event_id: String,
    pub data: Value,
    /// Event timestamp, epoch milliseconds
    pub timestamp: i64,
    pub block_height: u64,
}

/// Closed set of marketplace event kinds this pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PodListed,
    PodDelisted,
    PurchaseCreated,
    PurchaseCompleted,
    PaymentReleased,
    ReviewAdded,
}

impl EventKind {
    /// Map the wire-level type string to a kind; `None` for anything
    /// this pipeline does not index.
    pub fn from_type(event_type: &str) -> Option<Self> {
        match event_type {
            "pod_listed" => Some(EventKind::PodListed),
            "pod_delisted" => Some(EventKind::PodDelisted),
            "purchase_created" => Some(EventKind::PurchaseCreated),
            "purchase_completed" => Some(EventKind::PurchaseCompleted),
            "payment_released" => Some(EventKind::PaymentReleased),
            "review_added" => Some(EventKind::ReviewAdded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PodListed => "pod_listed",
            EventKind::PodDelisted => "pod_delisted",
            EventKind::PurchaseCreated => "purchase_created",
            EventKind::PurchaseCompleted => "purchase_completed",
            EventKind::PaymentReleased => "payment_released",
            EventKind::ReviewAdded => "review_added",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            EventKind::PodListed,
            EventKind::PodDelisted,
            EventKind::PurchaseCreated,
            EventKind::PurchaseCompleted,
            EventKind::PaymentReleased,
            EventKind::ReviewAdded,
        ] {
            assert_eq!(EventKind::from_type(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_unknown_kind() {
        assert_eq!(EventKind::from_type("pod_transferred"), None);
    }

    #[test]
    fn test_raw_event_deserializes_from_wire_shape() {
        let raw: RawEvent = serde_json::from_value(serde_json::json!({
            "type": "pod_listed",
            "event_id": "evt-1",
            "data": { "pod_id": "pod-1" },
            "timestamp": 1_700_000_000_000i64,
            "block_height": 42,
        }))
        .unwrap();
        assert_eq!(raw.event_type, "pod_listed");
        assert_eq!(raw.block_height, 42);
    }
}
