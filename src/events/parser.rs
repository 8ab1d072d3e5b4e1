//! Per-kind validation of raw marketplace event payloads.
//!
//! Each parser turns an opaque JSON payload into a fully validated typed
//! record or nothing at all; a malformed payload is logged and dropped
//! without disturbing the rest of the pipeline. Monetary amounts are
//! decoded into `BigDecimal` whether the wire carries them as strings or
//! JSON numbers, never through floating point.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use log::warn;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::IndexerError;
use crate::events::raw::{EventKind, RawEvent};

/// Decode an amount from either a numeric string or a JSON number,
/// preserving full precision. Negative amounts are rejected.
fn amount_from_value(value: &Value) -> Result<BigDecimal, String> {
    let amount = match value {
        Value::String(s) => BigDecimal::from_str(s.trim())
            .map_err(|e| format!("invalid amount string {:?}: {}", s, e))?,
        Value::Number(n) => BigDecimal::from_str(&n.to_string())
            .map_err(|e| format!("invalid amount number {}: {}", n, e))?,
        other => return Err(format!("expected amount string or number, got {}", other)),
    };

    if amount < BigDecimal::from(0) {
        return Err(format!("negative amount {}", amount));
    }

    Ok(amount)
}

fn de_amount<'de, D>(deserializer: D) -> Result<BigDecimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    amount_from_value(&value).map_err(serde::de::Error::custom)
}

fn de_opt_amount<'de, D>(deserializer: D) -> Result<Option<BigDecimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => amount_from_value(&v)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PodListedPayload {
    pub pod_id: String,
    pub seller: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(deserialize_with = "de_amount")]
    pub price: BigDecimal,
    #[serde(default)]
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PodDelistedPayload {
    pub pod_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseCreatedPayload {
    pub purchase_id: String,
    pub pod_id: String,
    pub buyer: String,
    #[serde(deserialize_with = "de_amount")]
    pub amount: BigDecimal,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseCompletedPayload {
    pub purchase_id: String,
    #[serde(default)]
    pub delivery_hash: Option<String>,
}

/// Payment releases may arrive without a purchase linkage; such events
/// are valid on the wire but have no escrow row to update downstream.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentReleasedPayload {
    #[serde(default)]
    pub purchase_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub amount: Option<BigDecimal>,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewAddedPayload {
    pub pod_id: String,
    pub reviewer: String,
    pub rating: i16,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Validated payload, one variant per event kind.
#[derive(Debug, Clone)]
pub enum EventPayload {
    PodListed(PodListedPayload),
    PodDelisted(PodDelistedPayload),
    PurchaseCreated(PurchaseCreatedPayload),
    PurchaseCompleted(PurchaseCompletedPayload),
    PaymentReleased(PaymentReleasedPayload),
    ReviewAdded(ReviewAddedPayload),
}

/// Fully validated event with its envelope metadata, ready for the
/// transformer. Never persisted as-is.
#[derive(Debug, Clone)]
pub struct ParsedEvent {
    pub event_id: String,
    /// Event timestamp, epoch milliseconds
    pub timestamp: i64,
    pub block_height: u64,
    pub payload: EventPayload,
}

fn decode<T: serde::de::DeserializeOwned>(raw: &RawEvent) -> Option<T> {
    match serde_json::from_value(raw.data.clone()) {
        Ok(payload) => Some(payload),
        Err(e) => {
            let err = IndexerError::validation(format!(
                "event {} ({}) failed validation: {}",
                raw.event_id, raw.event_type, e
            ))
            .with_details(raw.data.clone());
            warn!("{} payload={}", err, raw.data);
            None
        },
    }
}

/// Parse and validate one raw event.
///
/// Returns `None` for unknown event types and malformed payloads; both
/// are logged and dropped, never retried, and never block later events.
pub fn parse_event(raw: &RawEvent) -> Option<ParsedEvent> {
    let kind = match EventKind::from_type(&raw.event_type) {
        Some(kind) => kind,
        None => {
            warn!(
                "Skipping event {} with unknown type {:?}",
                raw.event_id, raw.event_type
            );
            return None;
        },
    };

    let payload = match kind {
        EventKind::PodListed => EventPayload::PodListed(decode(raw)?),
        EventKind::PodDelisted => EventPayload::PodDelisted(decode(raw)?),
        EventKind::PurchaseCreated => EventPayload::PurchaseCreated(decode(raw)?),
        EventKind::PurchaseCompleted => EventPayload::PurchaseCompleted(decode(raw)?),
        EventKind::PaymentReleased => EventPayload::PaymentReleased(decode(raw)?),
        EventKind::ReviewAdded => {
            let payload: ReviewAddedPayload = decode(raw)?;
            if !(1..=5).contains(&payload.rating) {
                warn!(
                    "{} payload={}",
                    IndexerError::validation(format!(
                        "event {} has out-of-range rating {}",
                        raw.event_id, payload.rating
                    )),
                    raw.data
                );
                return None;
            }
            EventPayload::ReviewAdded(payload)
        },
    };

    Some(ParsedEvent {
        event_id: raw.event_id.clone(),
        timestamp: raw.timestamp,
        block_height: raw.block_height,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(event_type: &str, data: Value) -> RawEvent {
        RawEvent {
            event_type: event_type.to_string(),
            event_id: "evt-1".to_string(),
            data,
            timestamp: 1_700_000_000_000,
            block_height: 100,
        }
    }

    #[test]
    fn test_parse_pod_listed_with_string_price() {
        let parsed = parse_event(&raw(
            "pod_listed",
            json!({
                "pod_id": "pod-1",
                "seller": "0xabc",
                "name": "Weather Data",
                "price": "1000000000000000000",
            }),
        ))
        .unwrap();

        match parsed.payload {
            EventPayload::PodListed(p) => {
                assert_eq!(p.pod_id, "pod-1");
                assert_eq!(p.price, BigDecimal::from_str("1000000000000000000").unwrap());
            },
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_parse_price_as_number_matches_string_form() {
        let from_number = parse_event(&raw(
            "pod_listed",
            json!({ "pod_id": "p", "seller": "s", "name": "n", "price": 42 }),
        ))
        .unwrap();
        let from_string = parse_event(&raw(
            "pod_listed",
            json!({ "pod_id": "p", "seller": "s", "name": "n", "price": "42" }),
        ))
        .unwrap();

        let (EventPayload::PodListed(a), EventPayload::PodListed(b)) =
            (from_number.payload, from_string.payload)
        else {
            panic!("unexpected payloads");
        };
        assert_eq!(a.price, b.price);
    }

    #[test]
    fn test_missing_required_field_is_dropped() {
        let parsed = parse_event(&raw(
            "pod_listed",
            json!({ "seller": "0xabc", "name": "n", "price": "1" }),
        ));
        assert!(parsed.is_none());
    }

    #[test]
    fn test_negative_amount_is_dropped() {
        let parsed = parse_event(&raw(
            "purchase_created",
            json!({
                "purchase_id": "pr-1",
                "pod_id": "pod-1",
                "buyer": "0xdef",
                "amount": "-5",
            }),
        ));
        assert!(parsed.is_none());
    }

    #[test]
    fn test_unknown_event_type_is_dropped() {
        let parsed = parse_event(&raw("pod_transferred", json!({})));
        assert!(parsed.is_none());
    }

    #[test]
    fn test_rating_out_of_range_is_dropped() {
        let parsed = parse_event(&raw(
            "review_added",
            json!({ "pod_id": "pod-1", "reviewer": "0xabc", "rating": 9 }),
        ));
        assert!(parsed.is_none());
    }

    #[test]
    fn test_payment_released_without_purchase_id_still_parses() {
        let parsed = parse_event(&raw("payment_released", json!({ "amount": "7" }))).unwrap();
        match parsed.payload {
            EventPayload::PaymentReleased(p) => {
                assert!(p.purchase_id.is_none());
                assert_eq!(p.amount, Some(BigDecimal::from(7)));
            },
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
