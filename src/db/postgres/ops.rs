use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Transaction;
use log::{error, warn};

use crate::db::models::{
    Checkpoint, DataPod, EscrowRelease, PodDelisting, Purchase, PurchaseCompletion, Record,
    Review, User, ESCROW_STATUS_LOCKED, ESCROW_STATUS_RELEASED, POD_STATUS_DELISTED,
    PURCHASE_STATUS_COMPLETED,
};
use crate::db::postgres::PostgresClient;
use crate::db::{CheckpointStore, EventStore, StoredEvent};
use crate::error::IndexerError;

/// Fixed id of the singleton checkpoint row.
const CHECKPOINT_ID: &str = "marketplace-indexer";

/// Sanitize a string for PostgreSQL by removing null bytes (0x00)
/// which are invalid in UTF-8 text columns
fn sanitize_string(s: &str) -> String {
    s.replace('\0', "")
}

impl PostgresClient {
    // ==================== CHECKPOINT ====================

    /// Get the singleton ingestion checkpoint, if one has been persisted.
    pub async fn get_ingest_checkpoint(&self) -> anyhow::Result<Option<Checkpoint>> {
        let client = self.pool.get().await?;
        let query = "SELECT data FROM market.checkpoints WHERE id = $1";

        let row = client.query_opt(query, &[&CHECKPOINT_ID]).await?;

        match row {
            Some(row) => {
                let data: serde_json::Value = row.get("data");
                let checkpoint = serde_json::from_value(data)
                    .context("Stored checkpoint blob failed to deserialize")?;
                Ok(Some(checkpoint))
            },
            None => Ok(None),
        }
    }

    /// Upsert the singleton ingestion checkpoint.
    pub async fn set_ingest_checkpoint(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO market.checkpoints (id, data, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
        "#;

        let data = serde_json::to_value(checkpoint)?;

        client
            .execute(query, &[&CHECKPOINT_ID, &data, &Utc::now()])
            .await
            .map_err(|e| {
                error!("Failed to upsert ingest checkpoint: {:?}", e);
                e
            })?;

        Ok(())
    }
}

// ==================== PER-TYPE DISPATCH ====================

/// Apply one event inside the batch transaction, dispatching by record type.
///
/// Every branch is an idempotent upsert or update keyed by the event's
/// natural blockchain identifier, so replaying a committed batch cannot
/// double-apply.
async fn apply_event(tx: &Transaction<'_>, event: &StoredEvent) -> anyhow::Result<()> {
    match &event.record {
        Record::PodListed(pod) => upsert_datapod(tx, pod).await,
        Record::PodDelisted(delisting) => delist_datapod(tx, delisting).await,
        Record::PurchaseCreated(purchase) => upsert_purchase(tx, purchase).await,
        Record::PurchaseCompleted(completion) => complete_purchase(tx, completion).await,
        Record::PaymentReleased(release) => release_escrow(tx, release).await,
        Record::ReviewAdded(review) => upsert_review(tx, review).await,
    }
    .with_context(|| {
        IndexerError::storage(format!(
            "failed to apply {} event {}",
            event.record.kind_str(),
            event.event_id
        ))
    })
}

/// Insert a placeholder user row if the address has never been seen.
/// Existing rows (placeholder or not) are left untouched.
async fn ensure_user(tx: &Transaction<'_>, address: &str) -> anyhow::Result<()> {
    let user = User::placeholder(address.to_string(), Utc::now());

    let query = r#"
        INSERT INTO market.users (address, username, placeholder, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (address) DO NOTHING
    "#;

    tx.execute(
        query,
        &[
            &user.address,
            &user.username,
            &user.placeholder,
            &user.created_at,
            &user.updated_at,
        ],
    )
    .await?;
    Ok(())
}

async fn upsert_datapod(tx: &Transaction<'_>, pod: &DataPod) -> anyhow::Result<()> {
    ensure_user(tx, &pod.seller).await?;

    // Sales counters and rating are accumulated state; a replayed listing
    // event must not reset them.
    let query = r#"
        INSERT INTO market.datapods (
            pod_id, seller, name, description, category,
            price, status, total_sales, rating, listed_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6::numeric, $7, $8, $9, $10, $11)
        ON CONFLICT (pod_id) DO UPDATE SET
            name = EXCLUDED.name,
            description = EXCLUDED.description,
            category = EXCLUDED.category,
            price = EXCLUDED.price,
            status = EXCLUDED.status,
            updated_at = EXCLUDED.updated_at
    "#;

    tx.execute(
        query,
        &[
            &pod.pod_id,
            &pod.seller,
            &sanitize_string(&pod.name),
            &pod.description,
            &pod.category,
            &pod.price.to_string(),
            &pod.status,
            &pod.total_sales,
            &pod.rating,
            &pod.listed_at,
            &pod.updated_at,
        ],
    )
    .await?;

    Ok(())
}

async fn delist_datapod(tx: &Transaction<'_>, delisting: &PodDelisting) -> anyhow::Result<()> {
    let query = r#"
        UPDATE market.datapods
        SET status = $2, updated_at = $3
        WHERE pod_id = $1
    "#;

    let updated = tx
        .execute(
            query,
            &[
                &delisting.pod_id,
                &POD_STATUS_DELISTED,
                &delisting.delisted_at,
            ],
        )
        .await?;

    // Unknown pod id means the delist was already applied (or the listing
    // never reached us); duplicate delivery makes this a normal case.
    if updated == 0 {
        warn!(
            "Delist for unknown pod {} ignored (already applied?)",
            delisting.pod_id
        );
    }

    Ok(())
}

async fn upsert_purchase(tx: &Transaction<'_>, purchase: &Purchase) -> anyhow::Result<()> {
    ensure_user(tx, &purchase.buyer).await?;

    // Status is deliberately not overwritten on conflict: a replayed
    // purchase-created event must not regress a completed purchase.
    let query = r#"
        INSERT INTO market.purchases (
            purchase_id, pod_id, buyer, amount, status, tx_hash, created_at, updated_at
        ) VALUES ($1, $2, $3, $4::numeric, $5, $6, $7, $8)
        ON CONFLICT (purchase_id) DO UPDATE SET
            amount = EXCLUDED.amount,
            tx_hash = EXCLUDED.tx_hash,
            updated_at = EXCLUDED.updated_at
    "#;

    tx.execute(
        query,
        &[
            &purchase.purchase_id,
            &purchase.pod_id,
            &purchase.buyer,
            &purchase.amount.to_string(),
            &purchase.status,
            &purchase.tx_hash,
            &purchase.created_at,
            &purchase.updated_at,
        ],
    )
    .await?;

    // The escrow row tracking the locked funds for this purchase
    let escrow_query = r#"
        INSERT INTO market.escrow_transactions (
            purchase_id, amount, status, tx_hash, created_at, updated_at
        ) VALUES ($1, $2::numeric, $3, $4, $5, $6)
        ON CONFLICT (purchase_id) DO UPDATE SET
            amount = EXCLUDED.amount,
            updated_at = EXCLUDED.updated_at
    "#;

    tx.execute(
        escrow_query,
        &[
            &purchase.purchase_id,
            &purchase.amount.to_string(),
            &ESCROW_STATUS_LOCKED,
            &purchase.tx_hash,
            &purchase.created_at,
            &purchase.updated_at,
        ],
    )
    .await?;

    Ok(())
}

async fn complete_purchase(
    tx: &Transaction<'_>,
    completion: &PurchaseCompletion,
) -> anyhow::Result<()> {
    let query = r#"
        UPDATE market.purchases
        SET status = $2, delivery_hash = $3, completed_at = $4, updated_at = $4
        WHERE purchase_id = $1
    "#;

    let updated = tx
        .execute(
            query,
            &[
                &completion.purchase_id,
                &PURCHASE_STATUS_COMPLETED,
                &completion.delivery_hash,
                &completion.completed_at,
            ],
        )
        .await?;

    if updated == 0 {
        warn!(
            "Completion for unknown purchase {} ignored",
            completion.purchase_id
        );
    }

    Ok(())
}

async fn release_escrow(tx: &Transaction<'_>, release: &EscrowRelease) -> anyhow::Result<()> {
    let query = r#"
        UPDATE market.escrow_transactions
        SET status = $2, tx_hash = COALESCE($3, tx_hash), released_at = $4, updated_at = $4
        WHERE purchase_id = $1
    "#;

    let updated = tx
        .execute(
            query,
            &[
                &release.purchase_id,
                &ESCROW_STATUS_RELEASED,
                &release.tx_hash,
                &release.released_at,
            ],
        )
        .await?;

    if updated == 0 {
        warn!(
            "Escrow release for unknown purchase {} ignored",
            release.purchase_id
        );
    }

    Ok(())
}

async fn upsert_review(tx: &Transaction<'_>, review: &Review) -> anyhow::Result<()> {
    ensure_user(tx, &review.reviewer).await?;

    let query = r#"
        INSERT INTO market.reviews (
            pod_id, reviewer, rating, comment, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (pod_id, reviewer) DO UPDATE SET
            rating = EXCLUDED.rating,
            comment = EXCLUDED.comment,
            updated_at = EXCLUDED.updated_at
    "#;

    tx.execute(
        query,
        &[
            &review.pod_id,
            &review.reviewer,
            &review.rating,
            &review.comment.as_deref().map(sanitize_string),
            &review.created_at,
            &review.updated_at,
        ],
    )
    .await?;

    Ok(())
}

// ==================== STORE TRAIT IMPLS ====================

#[async_trait]
impl EventStore for PostgresClient {
    /// Apply a whole batch in arrival order inside one transaction.
    /// Any per-event failure aborts the transaction; none of the batch's
    /// effects persist on error.
    async fn write_batch(&self, events: &[StoredEvent]) -> anyhow::Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        for event in events {
            apply_event(&tx, event).await?;
        }

        tx.commit()
            .await
            .context("Failed to commit event batch transaction")?;

        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PostgresClient {
    async fn get_checkpoint(&self) -> anyhow::Result<Option<Checkpoint>> {
        self.get_ingest_checkpoint().await
    }

    async fn set_checkpoint(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        self.set_ingest_checkpoint(checkpoint).await
    }
}
