pub mod checkpoint;
pub mod datapod;
pub mod purchase;
pub mod review;
pub mod user;

pub use checkpoint::Checkpoint;
pub use datapod::{DataPod, PodDelisting, POD_STATUS_AVAILABLE, POD_STATUS_DELISTED};
pub use purchase::{
    EscrowRelease, Purchase, PurchaseCompletion, ESCROW_STATUS_LOCKED, ESCROW_STATUS_RELEASED,
    PURCHASE_STATUS_COMPLETED, PURCHASE_STATUS_PENDING,
};
pub use review::Review;
pub use user::User;

/// Persistence-ready record produced by the transformers, one variant per
/// event kind. Each variant maps to one idempotent upsert or update in
/// the per-type storage dispatch.
#[derive(Debug, Clone)]
pub enum Record {
    PodListed(DataPod),
    PodDelisted(PodDelisting),
    PurchaseCreated(Purchase),
    PurchaseCompleted(PurchaseCompletion),
    PaymentReleased(EscrowRelease),
    ReviewAdded(Review),
}

impl Record {
    pub fn kind_str(&self) -> &'static str {
        match self {
            Record::PodListed(_) => "pod_listed",
            Record::PodDelisted(_) => "pod_delisted",
            Record::PurchaseCreated(_) => "purchase_created",
            Record::PurchaseCompleted(_) => "purchase_completed",
            Record::PaymentReleased(_) => "payment_released",
            Record::ReviewAdded(_) => "review_added",
        }
    }
}
