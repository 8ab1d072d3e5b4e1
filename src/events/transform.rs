//! Per-kind transformation of validated payloads into persistence-ready
//! records.
//!
//! Transformers are pure functions of their payload plus the supplied
//! current time; they perform no I/O. A transform that cannot produce a
//! record logs and yields `None`, which callers treat exactly like a
//! parse failure: skip the event.

use chrono::{DateTime, TimeZone, Utc};
use log::info;

use crate::db::models::{
    DataPod, EscrowRelease, PodDelisting, Purchase, PurchaseCompletion, Record, Review,
    POD_STATUS_AVAILABLE, PURCHASE_STATUS_PENDING,
};
use crate::error::IndexerError;
use crate::events::parser::{
    EventPayload, ParsedEvent, PaymentReleasedPayload, PodDelistedPayload, PodListedPayload,
    PurchaseCompletedPayload, PurchaseCreatedPayload, ReviewAddedPayload,
};

/// Event timestamps arrive as epoch milliseconds; fall back to `now` for
/// values outside chrono's representable range.
fn event_time(timestamp_ms: i64, now: DateTime<Utc>) -> DateTime<Utc> {
    match Utc.timestamp_millis_opt(timestamp_ms) {
        chrono::LocalResult::Single(t) => t,
        _ => now,
    }
}

fn transform_pod_listed(
    payload: PodListedPayload,
    listed_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DataPod {
    // A freshly published listing always starts available with zero
    // sales and no rating.
    DataPod {
        pod_id: payload.pod_id,
        seller: payload.seller,
        name: payload.name,
        description: payload.description,
        category: payload.category,
        price: payload.price,
        status: POD_STATUS_AVAILABLE.to_string(),
        total_sales: 0,
        rating: None,
        listed_at,
        updated_at: now,
    }
}

fn transform_pod_delisted(payload: PodDelistedPayload, now: DateTime<Utc>) -> PodDelisting {
    // A delisting only ever changes status and a timestamp.
    PodDelisting {
        pod_id: payload.pod_id,
        delisted_at: now,
    }
}

fn transform_purchase_created(
    payload: PurchaseCreatedPayload,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Purchase {
    Purchase {
        purchase_id: payload.purchase_id,
        pod_id: payload.pod_id,
        buyer: payload.buyer,
        amount: payload.amount,
        status: PURCHASE_STATUS_PENDING.to_string(),
        tx_hash: payload.tx_hash,
        created_at,
        updated_at: now,
    }
}

fn transform_purchase_completed(
    payload: PurchaseCompletedPayload,
    completed_at: DateTime<Utc>,
) -> PurchaseCompletion {
    PurchaseCompletion {
        purchase_id: payload.purchase_id,
        delivery_hash: payload.delivery_hash,
        completed_at,
    }
}

fn transform_payment_released(
    payload: PaymentReleasedPayload,
    released_at: DateTime<Utc>,
    event_id: &str,
) -> Option<EscrowRelease> {
    // Without a purchase linkage there is no escrow row to update; the
    // event is accepted but skipped.
    let Some(purchase_id) = payload.purchase_id else {
        info!(
            "{}; skipping",
            IndexerError::transform(format!(
                "payment release event {} has no purchase_id",
                event_id
            ))
        );
        return None;
    };

    Some(EscrowRelease {
        purchase_id,
        tx_hash: payload.tx_hash,
        released_at,
    })
}

fn transform_review_added(
    payload: ReviewAddedPayload,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Review {
    Review {
        pod_id: payload.pod_id,
        reviewer: payload.reviewer,
        rating: payload.rating,
        comment: payload.comment,
        created_at,
        updated_at: now,
    }
}

/// Map a validated event into the record the storage layer expects.
///
/// `None` means "skip this event", identical in effect to a parse
/// failure.
pub fn transform_event(event: &ParsedEvent, now: DateTime<Utc>) -> Option<Record> {
    let occurred_at = event_time(event.timestamp, now);

    let record = match event.payload.clone() {
        EventPayload::PodListed(p) => {
            Record::PodListed(transform_pod_listed(p, occurred_at, now))
        },
        EventPayload::PodDelisted(p) => Record::PodDelisted(transform_pod_delisted(p, now)),
        EventPayload::PurchaseCreated(p) => {
            Record::PurchaseCreated(transform_purchase_created(p, occurred_at, now))
        },
        EventPayload::PurchaseCompleted(p) => {
            Record::PurchaseCompleted(transform_purchase_completed(p, occurred_at))
        },
        EventPayload::PaymentReleased(p) => Record::PaymentReleased(transform_payment_released(
            p,
            occurred_at,
            &event.event_id,
        )?),
        EventPayload::ReviewAdded(p) => {
            Record::ReviewAdded(transform_review_added(p, occurred_at, now))
        },
    };

    Some(record)
}
