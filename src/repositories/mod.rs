use async_trait::async_trait;
use crate::models::price_tier::PriceTier;
use crate::models::transport_request::PendingRequest;

pub mod postgres_repo;

/// Storage seam used by the confirmation workflow.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Requests among `ids` that are still pending, with listing and requester.
    async fn pending_requests(&self, ids: &[i64]) -> anyhow::Result<Vec<PendingRequest>>;

    async fn price_tiers_for_listing(&self, listing_id: i64) -> anyhow::Result<Vec<PriceTier>>;

    /// Moves one request from pending to accepted in its own transaction.
    /// Returns false when the request was no longer pending.
    async fn accept_request(
        &self,
        request_id: i64,
        total_price: f64,
        payment_link: &str,
    ) -> anyhow::Result<bool>;
}
